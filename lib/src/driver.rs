use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::aggregator_traits::{Aggregator, Flushed, JobExecutor};
use crate::common::{Error, Result, MAX_RETAINED_WINDOW_REPORTS};
use crate::outcome::{JobNumber, JobOutcome};
use crate::window::{ClosedWindow, RunSummary};

/// Job numbers `1..=count`, in order.
pub fn sequential_jobs(count: u64) -> impl Stream<Item = JobNumber> + Unpin {
    futures_util::stream::iter(1..=count)
}

/// What happened during one run of the driver.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub jobs: u64,
    pub successes: u64,
    pub failures: u64,
    pub windows_closed: u64,
    pub cancelled: bool,
    /// The most recently closed windows, oldest first. Older windows are
    /// dropped from the report (but still counted) once the limit is reached.
    pub windows: VecDeque<ClosedWindow>,
    pub summary: Option<RunSummary>,
}

impl RunReport {
    fn push_window(&mut self, window: ClosedWindow) {
        self.windows_closed += 1;
        if self.windows.len() == MAX_RETAINED_WINDOW_REPORTS {
            self.windows.pop_front();
        }
        self.windows.push_back(window);
    }

    fn push_flushed(&mut self, flushed: Flushed) {
        match flushed {
            Flushed::Window(window) => self.push_window(window),
            Flushed::Summary(summary) => self.summary = Some(summary),
        }
    }

    fn count(&mut self, outcome: &JobOutcome) {
        self.jobs += 1;
        if outcome.is_success() {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
    }
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

/// Pulls job numbers from a source, runs them through a [`JobExecutor`], and
/// feeds the outcomes to an [`Aggregator`].
///
/// With more than one worker, jobs run concurrently on blocking threads. Every
/// in-flight job is finished and recorded before a window is rotated, flushed,
/// or the run ends, so a window's counts only ever include its own jobs.
pub struct AggregationDriver<A, E> {
    aggregator: A,
    executor: Arc<E>,
    workers: usize,
    cancel: CancellationToken,
}

impl<A, E> AggregationDriver<A, E>
where
    A: Aggregator,
    E: JobExecutor,
{
    pub fn new(aggregator: A, executor: Arc<E>) -> Self {
        AggregationDriver {
            aggregator,
            executor,
            workers: 1,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Cancelling this token stops the run after in-flight jobs finish; the
    /// open window is still closed.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Process jobs until the source is exhausted or the run is cancelled.
    pub async fn run<S>(mut self, mut source: S) -> Result<RunReport>
    where
        S: Stream<Item = JobNumber> + Unpin,
    {
        let mut report = RunReport::default();
        let mut in_flight = JoinSet::new();

        let processed = self.process(&mut source, &mut in_flight, &mut report).await;
        let drained = self.drain(&mut in_flight, &mut report).await;
        let finished = self.aggregator.finish();

        processed?;
        drained?;
        if let Some(flushed) = finished? {
            report.push_flushed(flushed);
        }

        tracing::info!(
            jobs = report.jobs,
            successes = report.successes,
            failures = report.failures,
            windows = report.windows_closed,
            cancelled = report.cancelled,
            "run finished"
        );
        Ok(report)
    }

    async fn process<S>(
        &mut self,
        source: &mut S,
        in_flight: &mut JoinSet<JobOutcome>,
        report: &mut RunReport,
    ) -> Result<()>
    where
        S: Stream<Item = JobNumber> + Unpin,
    {
        loop {
            let idle_deadline = self.aggregator.idle_deadline();

            let job = tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    tracing::info!("run cancelled");
                    report.cancelled = true;
                    return Ok(());
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    self.record(joined?, report);
                    continue;
                }
                _ = sleep_until(idle_deadline), if idle_deadline.is_some() => {
                    self.drain(in_flight, report).await?;
                    if let Some(window) = self.aggregator.flush_idle(now())? {
                        report.push_window(window);
                    }
                    continue;
                }
                job = source.next() => job,
            };

            let Some(job) = job else {
                return Ok(());
            };

            let now = now();
            if self.aggregator.should_rotate(job, now) {
                self.drain(in_flight, report).await?;
                if let Some(window) = self.aggregator.rotate(job, now)? {
                    report.push_window(window);
                }
            }

            let cx = self.aggregator.context_for(job, now)?;

            while in_flight.len() >= self.workers {
                match in_flight.join_next().await {
                    Some(joined) => self.record(joined?, report),
                    None => break,
                }
            }

            let executor = Arc::clone(&self.executor);
            in_flight.spawn_blocking(move || executor.run(&cx, job));
        }
    }

    /// Wait for every in-flight job, recording each outcome. The first worker
    /// failure is returned after all others have been collected.
    async fn drain(
        &self,
        in_flight: &mut JoinSet<JobOutcome>,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut failure = None;
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok(outcome) => self.record(outcome, report),
                Err(err) => {
                    tracing::error!(%err, "job worker failed");
                    failure.get_or_insert(Error::Worker(err));
                }
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn record(&self, outcome: JobOutcome, report: &mut RunReport) {
        self.aggregator.record(&outcome);
        report.count(&outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregatorConfig;
    use crate::outcome::ErrorCategory;
    use crate::spans::SpanCollector;
    use crate::window::{LinkRegistry, WindowController};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::Context;

    fn categorized(_cx: &Context, job: JobNumber) -> JobOutcome {
        if job % 17 == 0 {
            JobOutcome::failed(job, ErrorCategory::SchedulingFailure)
        } else {
            JobOutcome::succeeded(job)
        }
    }

    #[tokio::test]
    async fn every_job_lands_in_exactly_one_window() {
        let collector = SpanCollector::new();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_span_processor(collector.clone())
            .build();
        let config = AggregatorConfig::default().with_max_jobs_per_window(10);
        let controller = WindowController::new(
            provider.tracer("driver-tests"),
            &config,
            Arc::new(LinkRegistry::new()),
        );

        let report = AggregationDriver::new(controller, Arc::new(categorized))
            .run(sequential_jobs(34))
            .await
            .unwrap();

        assert_eq!(report.jobs, 34);
        assert_eq!(report.failures, 2);
        assert_eq!(report.windows_closed, 4);
        let ranges: Vec<(u64, u64)> = report
            .windows
            .iter()
            .map(|w| (w.starting_job, w.ending_job))
            .collect();
        assert_eq!(ranges, vec![(1, 10), (11, 20), (21, 30), (31, 34)]);
    }

    #[tokio::test]
    async fn gaps_in_job_numbers_do_not_shrink_windows() {
        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        let config = AggregatorConfig::default().with_max_jobs_per_window(10);
        let controller = WindowController::new(
            provider.tracer("driver-tests"),
            &config,
            Arc::new(LinkRegistry::new()),
        );

        let even_jobs = futures_util::stream::iter((1..=100u64).map(|n| n * 2));
        let report = AggregationDriver::new(controller, Arc::new(categorized))
            .run(even_jobs)
            .await
            .unwrap();

        assert_eq!(report.jobs, 100);
        assert_eq!(report.windows_closed, 10);
        assert!(report.windows.iter().all(|w| w.counts.jobs() == 10));
        let starts: Vec<u64> = report.windows.iter().map(|w| w.starting_job).collect();
        assert_eq!(starts, (0..10).map(|i| i * 20 + 2).collect::<Vec<_>>());
        assert_eq!(report.windows.front().map(|w| w.ending_job), Some(21));
        assert_eq!(report.windows.back().map(|w| w.ending_job), Some(200));
    }

    #[tokio::test]
    async fn pre_cancelled_run_processes_nothing() {
        let provider = opentelemetry_sdk::trace::TracerProvider::builder().build();
        let controller = WindowController::new(
            provider.tracer("driver-tests"),
            &AggregatorConfig::default(),
            Arc::new(LinkRegistry::new()),
        );
        let driver = AggregationDriver::new(controller, Arc::new(categorized));
        driver.cancellation_token().cancel();

        let report = driver.run(sequential_jobs(100)).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.jobs, 0);
        assert_eq!(report.windows_closed, 0);
    }

    #[test]
    fn report_retains_a_bounded_window_history() {
        let window = ClosedWindow {
            index: 0,
            starting_job: 1,
            ending_job: 1,
            counts: Default::default(),
            span_context: opentelemetry::trace::SpanContext::empty_context(),
            link: None,
            reason: crate::window::CloseReason::JobCount,
        };

        let mut report = RunReport::default();
        for index in 0..(MAX_RETAINED_WINDOW_REPORTS as u64 + 5) {
            report.push_window(ClosedWindow {
                index,
                ..window.clone()
            });
        }

        assert_eq!(report.windows.len(), MAX_RETAINED_WINDOW_REPORTS);
        assert_eq!(report.windows_closed, MAX_RETAINED_WINDOW_REPORTS as u64 + 5);
        assert_eq!(report.windows.front().map(|w| w.index), Some(5));
    }
}
