use std::sync::{Arc, OnceLock};
use std::time::Instant;

use opentelemetry::trace::{Span, SpanContext, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::aggregator_traits::{Aggregator, Flushed};
use crate::common::*;
use crate::config::{AggregatorConfig, ErrorMode, FreeTextPolicy, RotationPolicy};
use crate::outcome::{ErrorCategory, JobNumber, JobOutcome, JobStatus};
use crate::window::counters::{CounterSet, CounterSnapshot};
use crate::window::links::{LinkDescriptor, LinkRegistry};

/// Why a window was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    JobCount,
    Elapsed,
    Idle,
    EndOfRun,
    Explicit,
}

/// The identity of an open window, handed to whoever runs jobs inside it.
#[derive(Debug, Clone)]
pub struct WindowHandle {
    pub index: u64,
    pub starting_job: JobNumber,
    pub context: Context,
}

/// Everything that was written onto a window span when it was finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedWindow {
    pub index: u64,
    pub starting_job: JobNumber,
    pub ending_job: JobNumber,
    pub counts: CounterSnapshot,
    pub span_context: SpanContext,
    pub link: Option<LinkDescriptor>,
    pub reason: CloseReason,
}

impl ClosedWindow {
    /// Number of job numbers the window covered.
    pub fn job_range_len(&self) -> u64 {
        (self.ending_job + 1).saturating_sub(self.starting_job)
    }
}

struct OpenWindow {
    index: u64,
    starting_job: JobNumber,
    // One past the last job dispatched into this window.
    next_job: JobNumber,
    dispatched: u64,
    opened_at: Instant,
    cx: Context,
    link: Option<LinkDescriptor>,
    errors_cx: OnceLock<Context>,
}

impl OpenWindow {
    fn is_empty(&self) -> bool {
        self.dispatched == 0
    }
}

/// Owns the single open window span and decides when to rotate it.
///
/// Counters are updated through `&self` so outcomes can be recorded while the
/// controller is shared; opening, closing and rotating need `&mut self`, which
/// keeps a close from racing with itself.
pub struct WindowController<T: Tracer> {
    tracer: T,
    policy: RotationPolicy,
    error_mode: ErrorMode,
    free_text_policy: FreeTextPolicy,
    links: Arc<LinkRegistry>,
    counters: CounterSet,
    window: Option<OpenWindow>,
    next_index: u64,
}

impl<T> WindowController<T>
where
    T: Tracer,
    T::Span: Send + Sync + 'static,
{
    pub fn new(tracer: T, config: &AggregatorConfig, links: Arc<LinkRegistry>) -> Self {
        WindowController {
            tracer,
            policy: config.rotation_policy(),
            error_mode: config.error_mode,
            free_text_policy: config.free_text_policy,
            links,
            counters: CounterSet::new(),
            window: None,
            next_index: 0,
        }
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    pub fn is_open(&self) -> bool {
        self.window.is_some()
    }

    /// Context carrying the open window's span, for the job executor.
    pub fn current_context(&self) -> Option<Context> {
        self.window.as_ref().map(|window| window.cx.clone())
    }

    /// Start a new window span beginning at `starting_job`.
    pub fn open(
        &mut self,
        starting_job: JobNumber,
        link: Option<&LinkDescriptor>,
        now: Instant,
    ) -> Result<WindowHandle> {
        if let Some(window) = &self.window {
            return Err(Error::WindowAlreadyOpen {
                index: window.index,
            });
        }

        self.counters.reset();
        let index = self.next_index;
        self.next_index += 1;

        let mut builder = self
            .tracer
            .span_builder(WINDOW_SPAN_NAME)
            .with_kind(SpanKind::Internal)
            .with_attributes(vec![
                KeyValue::new(ATTR_WINDOW_INDEX, attr_int(index)),
                KeyValue::new(ATTR_WINDOW_STARTING_JOB, attr_int(starting_job)),
            ]);
        if let Some(link) = link {
            builder = builder.with_links(vec![link.to_link()]);
        }

        // Windows are roots of their own traces; the link is what ties them to the run.
        let span = self.tracer.build_with_context(builder, &Context::new());
        let cx = Context::new().with_span(span);

        tracing::debug!(window = index, starting_job, "opened window");

        self.window = Some(OpenWindow {
            index,
            starting_job,
            next_job: starting_job,
            dispatched: 0,
            opened_at: now,
            cx: cx.clone(),
            link: link.cloned(),
            errors_cx: OnceLock::new(),
        });

        Ok(WindowHandle {
            index,
            starting_job,
            context: cx,
        })
    }

    /// Count a job outcome against the open window. Never fails.
    pub fn record(&self, outcome: &JobOutcome) {
        self.counters.record(outcome);

        let JobStatus::Errored(messages) = &outcome.status else {
            return;
        };
        for message in messages {
            tracing::warn!(job = outcome.job, message = %message, "job reported an error");
        }

        if self.error_mode != ErrorMode::FreeText || self.free_text_policy != FreeTextPolicy::FanOut
        {
            return;
        }
        let Some(window) = &self.window else {
            return;
        };

        let errors_cx = window.errors_cx.get_or_init(|| {
            let span = self.tracer.start_with_context(ERRORS_SPAN_NAME, &window.cx);
            window.cx.with_span(span)
        });
        for message in messages {
            let mut span = self
                .tracer
                .start_with_context(ERROR_MESSAGE_SPAN_NAME, errors_cx);
            span.set_attribute(KeyValue::new(ATTR_JOB_NUMBER, attr_int(outcome.job)));
            span.set_attribute(KeyValue::new(ATTR_ERROR_MESSAGE, message.clone()));
            span.set_status(Status::Error {
                description: message.clone().into(),
            });
            span.end();
        }
    }

    fn rotation_reason(&self, current_job: JobNumber, now: Instant) -> Option<CloseReason> {
        let window = self.window.as_ref()?;
        if window.is_empty() {
            return None;
        }

        if window.dispatched >= self.policy.max_jobs_per_window {
            Some(CloseReason::JobCount)
        } else if now.saturating_duration_since(window.opened_at) >= self.policy.max_window_duration
        {
            Some(CloseReason::Elapsed)
        } else {
            None
        }
    }

    /// True once `max_jobs_per_window` jobs have been dispatched into the open
    /// window, or it has been open for at least `max_window_duration`. Job
    /// numbers may have gaps; only dispatched jobs count. An empty window
    /// never rotates.
    pub fn should_rotate(&self, current_job: JobNumber, now: Instant) -> bool {
        self.rotation_reason(current_job, now).is_some()
    }

    /// Finalize the open window. `current_job` is the first job that does not
    /// belong to it.
    pub fn close(&mut self, current_job: JobNumber) -> Result<ClosedWindow> {
        self.close_with_reason(current_job, CloseReason::Explicit)
    }

    fn close_with_reason(
        &mut self,
        current_job: JobNumber,
        reason: CloseReason,
    ) -> Result<ClosedWindow> {
        let window = self.window.take().ok_or(Error::WindowNotOpen)?;
        let counts = self.counters.take();
        let ending_job = current_job.saturating_sub(1);

        let span = window.cx.span();
        for attribute in self.window_attributes(ending_job, &counts) {
            span.set_attribute(attribute);
        }
        if let Some(errors_cx) = window.errors_cx.get() {
            errors_cx.span().end();
        }
        span.end();

        tracing::info!(
            window = window.index,
            starting_job = window.starting_job,
            ending_job,
            successes = counts.successes,
            failures = counts.failures,
            ?reason,
            "closed window"
        );

        Ok(ClosedWindow {
            index: window.index,
            starting_job: window.starting_job,
            ending_job,
            span_context: span.span_context().clone(),
            link: window.link,
            counts,
            reason,
        })
    }

    fn window_attributes(&self, ending_job: JobNumber, counts: &CounterSnapshot) -> Vec<KeyValue> {
        let mut attributes = vec![
            KeyValue::new(ATTR_WINDOW_ENDING_JOB, attr_int(ending_job)),
            KeyValue::new(ATTR_WINDOW_SUCCESS_COUNT, attr_int(counts.successes)),
            KeyValue::new(ATTR_WINDOW_FAILURE_COUNT, attr_int(counts.failures)),
        ];

        match self.error_mode {
            ErrorMode::Categorized => {
                for category in ErrorCategory::ALL {
                    attributes.push(KeyValue::new(
                        category.window_attribute(),
                        attr_int(counts.category(category)),
                    ));
                }
            }
            ErrorMode::FreeText => {
                attributes.push(KeyValue::new(
                    ATTR_WINDOW_ERROR_MESSAGE_COUNT,
                    attr_int(counts.error_messages),
                ));
                if self.free_text_policy == FreeTextPolicy::CountOnly {
                    attributes.push(KeyValue::new(
                        ATTR_WINDOW_FAILED_JOB_IDS,
                        counts.failed_job_ids(),
                    ));
                }
            }
        }

        attributes
    }

    fn rotate_with_reason(
        &mut self,
        current_job: JobNumber,
        now: Instant,
        reason: CloseReason,
    ) -> Result<ClosedWindow> {
        let closed = self.close_with_reason(current_job, reason)?;
        let link = self.links.get();
        if link.is_none() {
            tracing::debug!("no startup span captured; opening window without a link");
        }
        self.open(current_job, link.as_ref(), now)?;
        Ok(closed)
    }

    /// Close the open window and open the next one, linked to the startup span.
    pub fn rotate(&mut self, current_job: JobNumber, now: Instant) -> Result<ClosedWindow> {
        let reason = self
            .rotation_reason(current_job, now)
            .unwrap_or(CloseReason::Explicit);
        self.rotate_with_reason(current_job, now, reason)
    }

    /// When a non-empty window should be flushed if no further job arrives.
    pub fn idle_deadline(&self) -> Option<Instant> {
        self.window
            .as_ref()
            .filter(|window| !window.is_empty())
            .map(|window| window.opened_at + self.policy.max_window_duration)
    }
}

impl<T> Aggregator for WindowController<T>
where
    T: Tracer + Send,
    T::Span: Send + Sync + 'static,
{
    fn should_rotate(&self, job: JobNumber, now: Instant) -> bool {
        WindowController::should_rotate(self, job, now)
    }

    fn rotate(&mut self, job: JobNumber, now: Instant) -> Result<Option<ClosedWindow>> {
        WindowController::rotate(self, job, now).map(Some)
    }

    fn context_for(&mut self, job: JobNumber, now: Instant) -> Result<Context> {
        if self.window.is_none() {
            let link = self.links.get();
            self.open(job, link.as_ref(), now)?;
        }

        let window = self.window.as_mut().ok_or(Error::WindowNotOpen)?;
        window.dispatched += 1;
        window.next_job = window.next_job.max(job + 1);
        Ok(window.cx.clone())
    }

    fn record(&self, outcome: &JobOutcome) {
        WindowController::record(self, outcome)
    }

    fn idle_deadline(&self) -> Option<Instant> {
        WindowController::idle_deadline(self)
    }

    fn flush_idle(&mut self, now: Instant) -> Result<Option<ClosedWindow>> {
        match (self.idle_deadline(), self.window.as_ref()) {
            (Some(deadline), Some(window)) if now >= deadline => {
                let next_job = window.next_job;
                self.close_with_reason(next_job, CloseReason::Idle).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn finish(&mut self) -> Result<Option<Flushed>> {
        match self.window.as_ref() {
            Some(window) => {
                let next_job = window.next_job;
                let closed = self.close_with_reason(next_job, CloseReason::EndOfRun)?;
                Ok(Some(Flushed::Window(closed)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::SpanCollector;
    use opentelemetry::trace::{SpanId, TraceFlags, TraceId, TraceState, TracerProvider as _};
    use std::time::Duration;

    fn controller(
        config: &AggregatorConfig,
    ) -> (
        WindowController<opentelemetry_sdk::trace::Tracer>,
        SpanCollector,
        opentelemetry_sdk::trace::TracerProvider,
    ) {
        let collector = SpanCollector::new();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_span_processor(collector.clone())
            .build();
        let tracer = provider.tracer("window-tests");
        let links = Arc::new(LinkRegistry::new());
        links
            .capture(&SpanContext::new(
                TraceId::from_bytes(42u128.to_be_bytes()),
                SpanId::from_bytes(42u64.to_be_bytes()),
                TraceFlags::SAMPLED,
                false,
                TraceState::default(),
            ))
            .unwrap();
        (WindowController::new(tracer, config, links), collector, provider)
    }

    #[test]
    fn count_trigger_fires_at_threshold() {
        let config = AggregatorConfig::default().with_max_jobs_per_window(3);
        let (mut controller, _collector, _provider) = controller(&config);
        let t0 = Instant::now();

        // Job numbers with gaps: only dispatched jobs fill the window.
        for job in [10, 20] {
            assert!(!controller.should_rotate(job, t0));
            Aggregator::context_for(&mut controller, job, t0).unwrap();
        }
        assert!(!controller.should_rotate(30, t0));
        Aggregator::context_for(&mut controller, 30, t0).unwrap();
        assert!(controller.should_rotate(40, t0));

        let closed = controller.rotate(40, t0).unwrap();
        assert_eq!(closed.reason, CloseReason::JobCount);
        assert_eq!((closed.starting_job, closed.ending_job), (10, 39));
        assert!(!controller.should_rotate(50, t0));
    }

    #[test]
    fn time_trigger_uses_inclusive_boundary() {
        let duration = Duration::from_secs(10);
        let config = AggregatorConfig::default()
            .with_max_jobs_per_window(1000)
            .with_max_window_duration(duration);
        let (mut controller, _collector, _provider) = controller(&config);
        let t0 = Instant::now();

        Aggregator::context_for(&mut controller, 1, t0).unwrap();
        assert!(!controller.should_rotate(2, t0 + duration - Duration::from_millis(1)));
        assert!(controller.should_rotate(2, t0 + duration));
        assert!(controller.should_rotate(2, t0 + duration + Duration::from_millis(1)));
    }

    #[test]
    fn empty_window_never_rotates() {
        let config = AggregatorConfig::default().with_max_window_duration(Duration::from_secs(1));
        let (mut controller, _collector, _provider) = controller(&config);
        let t0 = Instant::now();

        controller.open(5, None, t0).unwrap();
        assert!(!controller.should_rotate(5, t0 + Duration::from_secs(60)));
        assert!(controller.idle_deadline().is_none());
    }

    #[test]
    fn closing_twice_is_rejected() {
        let config = AggregatorConfig::default();
        let (mut controller, collector, _provider) = controller(&config);

        controller.open(1, None, Instant::now()).unwrap();
        controller.record(&JobOutcome::succeeded(1));
        let closed = controller.close(2).unwrap();
        assert_eq!(closed.counts.successes, 1);
        assert_eq!(closed.ending_job, 1);

        assert!(matches!(controller.close(2), Err(Error::WindowNotOpen)));
        assert_eq!(collector.named(WINDOW_SPAN_NAME).len(), 1);
    }

    #[test]
    fn opening_twice_is_rejected() {
        let config = AggregatorConfig::default();
        let (mut controller, _collector, _provider) = controller(&config);

        controller.open(1, None, Instant::now()).unwrap();
        assert!(matches!(
            controller.open(2, None, Instant::now()),
            Err(Error::WindowAlreadyOpen { index: 0 })
        ));
    }

    #[test]
    fn rotation_links_every_window_to_startup() {
        let config = AggregatorConfig::default().with_max_jobs_per_window(2);
        let (mut controller, _collector, _provider) = controller(&config);
        let now = Instant::now();

        let first = Aggregator::context_for(&mut controller, 1, now).unwrap();
        assert!(first.has_active_span());
        Aggregator::context_for(&mut controller, 2, now).unwrap();
        assert!(controller.should_rotate(3, now));

        let closed = controller.rotate(3, now).unwrap();
        assert_eq!(closed.reason, CloseReason::JobCount);
        assert_eq!((closed.starting_job, closed.ending_job), (1, 2));

        let last = controller.close(5).unwrap();
        assert_eq!(last.starting_job, 3);
        assert_eq!(closed.link, last.link);
        assert_eq!(last.link.unwrap().span_id(), SpanId::from_bytes(42u64.to_be_bytes()));
    }

    #[test]
    fn window_attributes_follow_error_mode() {
        let config = AggregatorConfig::default()
            .with_error_mode(ErrorMode::FreeText)
            .with_free_text_policy(FreeTextPolicy::CountOnly);
        let (mut controller, collector, _provider) = controller(&config);

        controller.open(1, None, Instant::now()).unwrap();
        controller.record(&JobOutcome::from_messages(1, vec!["a".into(), "b".into()]));
        controller.record(&JobOutcome::succeeded(2));
        controller.record(&JobOutcome::from_messages(3, vec!["c".into()]));
        controller.close(4).unwrap();

        let window = &collector.named(WINDOW_SPAN_NAME)[0];
        assert_eq!(
            crate::spans::int_attribute(window, ATTR_WINDOW_ERROR_MESSAGE_COUNT),
            Some(3)
        );
        assert_eq!(
            crate::spans::int_attribute(window, ATTR_WINDOW_FAILURE_COUNT),
            Some(2)
        );
        assert_eq!(
            crate::spans::string_attribute(window, ATTR_WINDOW_FAILED_JOB_IDS).as_deref(),
            Some("1, 3")
        );
        assert!(collector.named(ERRORS_SPAN_NAME).is_empty());
    }

    #[test]
    fn fan_out_creates_one_errors_span_per_window() {
        let config = AggregatorConfig::default().with_error_mode(ErrorMode::FreeText);
        let (mut controller, collector, _provider) = controller(&config);

        controller.open(1, None, Instant::now()).unwrap();
        controller.record(&JobOutcome::from_messages(1, vec!["a".into(), "b".into()]));
        controller.record(&JobOutcome::from_messages(2, vec!["c".into()]));
        let closed = controller.close(3).unwrap();

        let errors = collector.named(ERRORS_SPAN_NAME);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].parent_span_id, closed.span_context.span_id());

        let messages = collector.named(ERROR_MESSAGE_SPAN_NAME);
        assert_eq!(messages.len(), 3);
        assert!(messages
            .iter()
            .all(|span| span.parent_span_id == errors[0].span_context.span_id()));
    }
}
