use std::sync::Arc;
use std::time::Instant;

use opentelemetry::trace::{Span, SpanContext, SpanKind, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::aggregator_traits::{Aggregator, Flushed};
use crate::common::*;
use crate::outcome::{ErrorCategory, JobNumber, JobOutcome};
use crate::window::controller::ClosedWindow;
use crate::window::counters::{CounterSet, CounterSnapshot};
use crate::window::links::{LinkDescriptor, LinkRegistry};

/// The single span written at the end of a run in summary mode.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub counts: CounterSnapshot,
    pub span_context: SpanContext,
    pub link: Option<LinkDescriptor>,
}

/// Accumulates run-wide counters and writes them once, as one span.
pub struct SummaryEmitter<T: Tracer> {
    tracer: T,
    links: Arc<LinkRegistry>,
    counters: CounterSet,
    emitted: bool,
}

impl<T: Tracer> SummaryEmitter<T> {
    pub fn new(tracer: T, links: Arc<LinkRegistry>) -> Self {
        SummaryEmitter {
            tracer,
            links,
            counters: CounterSet::new(),
            emitted: false,
        }
    }

    pub fn record(&self, outcome: &JobOutcome) {
        self.counters.record(outcome);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Write the summary span. Fails if it has already been written.
    pub fn emit(&mut self) -> Result<RunSummary> {
        if self.emitted {
            return Err(Error::SummaryAlreadyEmitted);
        }
        self.emitted = true;

        let counts = self.counters.snapshot();
        let link = self.links.get();

        let mut attributes = vec![
            KeyValue::new(ATTR_JOB_EMITTED_BY, EMITTED_BY_SCHEDULER),
            KeyValue::new(ATTR_SUMMARY_FAILED_JOB_IDS, counts.failed_job_ids()),
            KeyValue::new(ATTR_SUMMARY_FAILED_COUNT, attr_int(counts.failures)),
            KeyValue::new(ATTR_SUMMARY_SUCCESS_COUNT, attr_int(counts.successes)),
        ];
        for category in ErrorCategory::ALL {
            attributes.push(KeyValue::new(
                category.summary_attribute(),
                attr_int(counts.category(category)),
            ));
        }
        attributes.push(KeyValue::new(
            ATTR_SUMMARY_ERROR_MESSAGE_COUNT,
            attr_int(counts.error_messages),
        ));

        let mut builder = self
            .tracer
            .span_builder(SUMMARY_SPAN_NAME)
            .with_kind(SpanKind::Internal)
            .with_attributes(attributes);
        if let Some(link) = &link {
            builder = builder.with_links(vec![link.to_link()]);
        }

        let mut span = self.tracer.build_with_context(builder, &Context::new());
        let span_context = span.span_context().clone();
        span.end();

        tracing::info!(
            successes = counts.successes,
            failures = counts.failures,
            failed_jobs = %counts.failed_job_ids(),
            "emitted run summary"
        );

        Ok(RunSummary {
            counts,
            span_context,
            link,
        })
    }
}

impl<T> Aggregator for SummaryEmitter<T>
where
    T: Tracer + Send,
{
    fn should_rotate(&self, _job: JobNumber, _now: Instant) -> bool {
        false
    }

    fn rotate(&mut self, _job: JobNumber, _now: Instant) -> Result<Option<ClosedWindow>> {
        Ok(None)
    }

    fn context_for(&mut self, _job: JobNumber, _now: Instant) -> Result<Context> {
        Ok(Context::new())
    }

    fn record(&self, outcome: &JobOutcome) {
        SummaryEmitter::record(self, outcome)
    }

    fn idle_deadline(&self) -> Option<Instant> {
        None
    }

    fn flush_idle(&mut self, _now: Instant) -> Result<Option<ClosedWindow>> {
        Ok(None)
    }

    fn finish(&mut self) -> Result<Option<Flushed>> {
        self.emit().map(|summary| Some(Flushed::Summary(summary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::{int_attribute, string_attribute, SpanCollector};
    use opentelemetry::trace::TracerProvider as _;

    #[test]
    fn emits_exactly_once() {
        let collector = SpanCollector::new();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_span_processor(collector.clone())
            .build();
        let mut emitter = SummaryEmitter::new(provider.tracer("summary-tests"), Arc::default());

        for job in 1..=5 {
            if job % 2 == 0 {
                emitter.record(&JobOutcome::failed(job, ErrorCategory::QuotaExceeded));
            } else {
                emitter.record(&JobOutcome::succeeded(job));
            }
        }

        let summary = emitter.emit().unwrap();
        assert_eq!(summary.counts.failures, 2);
        assert!(summary.link.is_none());
        assert!(matches!(emitter.emit(), Err(Error::SummaryAlreadyEmitted)));

        let spans = collector.named(SUMMARY_SPAN_NAME);
        assert_eq!(spans.len(), 1);
        assert_eq!(int_attribute(&spans[0], ATTR_SUMMARY_SUCCESS_COUNT), Some(3));
        assert_eq!(
            int_attribute(&spans[0], "summary.error.QuotaExceeded.count"),
            Some(2)
        );
        assert_eq!(
            string_attribute(&spans[0], ATTR_SUMMARY_FAILED_JOB_IDS).as_deref(),
            Some("2, 4")
        );
        assert_eq!(
            string_attribute(&spans[0], ATTR_JOB_EMITTED_BY).as_deref(),
            Some(EMITTED_BY_SCHEDULER)
        );
    }
}
