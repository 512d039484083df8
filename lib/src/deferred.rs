use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures_util::FutureExt;
use opentelemetry::trace::{Span, Status};
use tokio::runtime::Handle;
use tokio::task::JoinSet;

/// Ends its span exactly once: normally when [`DeferredSpan::complete`] is
/// called, otherwise (marked as an error) when it is dropped.
pub struct DeferredSpan<S: Span> {
    span: Option<S>,
}

impl<S: Span> DeferredSpan<S> {
    pub fn new(span: S) -> Self {
        DeferredSpan { span: Some(span) }
    }

    pub fn complete(mut self) {
        if let Some(mut span) = self.span.take() {
            span.end();
        }
    }
}

impl<S: Span> Drop for DeferredSpan<S> {
    fn drop(&mut self) {
        if let Some(mut span) = self.span.take() {
            span.set_status(Status::Error {
                description: "span was closed before its completion signal".into(),
            });
            span.end();
        }
    }
}

/// Outcome of waiting for deferred spans at shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Spans whose completion signal arrived within the grace period.
    pub completed: usize,
    /// Spans that were ended forcibly when the grace period ran out.
    pub forced: usize,
}

/// Spans whose end happens asynchronously, after the code that started them
/// has moved on. Shutdown waits for them, up to a grace period.
#[derive(Debug)]
pub struct DeferredSpans {
    handle: Handle,
    tasks: Mutex<JoinSet<()>>,
    // Tasks already joined by `reap`, not yet reported by `wait`.
    reaped_completed: AtomicUsize,
    reaped_failed: AtomicUsize,
}

impl DeferredSpans {
    pub fn new(handle: Handle) -> Self {
        DeferredSpans {
            handle,
            tasks: Mutex::new(JoinSet::new()),
            reaped_completed: AtomicUsize::new(0),
            reaped_failed: AtomicUsize::new(0),
        }
    }

    /// Uses the runtime the caller is running on, if any.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }

    /// End `span` after `delay`, without blocking the caller.
    pub fn end_after<S>(&self, span: S, delay: Duration)
    where
        S: Span + Send + 'static,
    {
        let guard = DeferredSpan::new(span);
        let task = async move {
            tokio::time::sleep(delay).await;
            guard.complete();
        };

        match self.tasks.lock() {
            Ok(mut tasks) => {
                self.reap(&mut tasks);
                tasks.spawn_on(task, &self.handle);
            }
            Err(_) => tracing::warn!("deferred span registry is poisoned; ending span now"),
        }
    }

    /// Spans whose close has not happened yet.
    pub fn outstanding(&self) -> usize {
        self.tasks.lock().map_or(0, |mut tasks| {
            self.reap(&mut tasks);
            tasks.len()
        })
    }

    /// Join every task that has already finished, without waiting.
    fn reap(&self, tasks: &mut JoinSet<()>) {
        while let Some(Some(joined)) = tasks.join_next().now_or_never() {
            match joined {
                Ok(()) => self.reaped_completed.fetch_add(1, Ordering::Relaxed),
                Err(err) => {
                    tracing::warn!(%err, "deferred span task failed");
                    self.reaped_failed.fetch_add(1, Ordering::Relaxed)
                }
            };
        }
    }

    fn with_reaped(&self, mut report: DrainReport) -> DrainReport {
        report.completed += self.reaped_completed.swap(0, Ordering::Relaxed);
        report.forced += self.reaped_failed.swap(0, Ordering::Relaxed);
        report
    }

    fn take_tasks(&self) -> JoinSet<()> {
        match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => JoinSet::new(),
        }
    }

    /// Wait for outstanding spans to complete. Whatever is still pending when
    /// `grace` elapses is ended with an error status.
    pub async fn wait(&self, grace: Duration) -> DrainReport {
        let deadline = tokio::time::Instant::now() + grace;
        let mut report = DrainReport::default();

        loop {
            let mut tasks = self.take_tasks();
            if tasks.is_empty() {
                return self.with_reaped(report);
            }

            loop {
                match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(Some(Ok(()))) => report.completed += 1,
                    Ok(Some(Err(err))) => {
                        tracing::warn!(%err, "deferred span task failed");
                        report.forced += 1;
                    }
                    Ok(None) => break,
                    Err(_) => {
                        report.forced += tasks.len();
                        tasks.abort_all();
                        while tasks.join_next().await.is_some() {}

                        let mut late = self.take_tasks();
                        report.forced += late.len();
                        late.abort_all();
                        while late.join_next().await.is_some() {}

                        tracing::warn!(
                            forced = report.forced,
                            "grace period elapsed; ended outstanding spans"
                        );
                        return self.with_reaped(report);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::SpanCollector;
    use opentelemetry::trace::{Tracer, TracerProvider as _};

    fn provider(collector: &SpanCollector) -> opentelemetry_sdk::trace::TracerProvider {
        opentelemetry_sdk::trace::TracerProvider::builder()
            .with_span_processor(collector.clone())
            .build()
    }

    #[test]
    fn dropped_guard_ends_span_with_error() {
        let collector = SpanCollector::new();
        let provider = provider(&collector);
        let tracer = provider.tracer("deferred-tests");

        DeferredSpan::new(tracer.start("completed")).complete();
        drop(DeferredSpan::new(tracer.start("abandoned")));

        assert_eq!(collector.named("completed")[0].status, Status::Unset);
        assert!(matches!(
            collector.named("abandoned")[0].status,
            Status::Error { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn spans_within_grace_complete() {
        let collector = SpanCollector::new();
        let provider = provider(&collector);
        let tracer = provider.tracer("deferred-tests");
        let deferred = DeferredSpans::current().unwrap();

        deferred.end_after(tracer.start("step"), Duration::from_millis(100));
        deferred.end_after(tracer.start("step"), Duration::from_millis(200));
        assert_eq!(deferred.outstanding(), 2);

        let report = deferred.wait(Duration::from_secs(1)).await;
        assert_eq!(report, DrainReport { completed: 2, forced: 0 });
        assert_eq!(collector.named("step").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ended_spans_leave_the_registry() {
        let collector = SpanCollector::new();
        let provider = provider(&collector);
        let tracer = provider.tracer("deferred-tests");
        let deferred = DeferredSpans::current().unwrap();

        for _ in 0..10_000 {
            deferred.end_after(tracer.start("step"), Duration::ZERO);
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(deferred.outstanding(), 0);
        assert_eq!(collector.named("step").len(), 10_000);

        let report = deferred.wait(Duration::from_secs(1)).await;
        assert_eq!(report, DrainReport { completed: 10_000, forced: 0 });
    }

    #[tokio::test(start_paused = true)]
    async fn spans_past_grace_are_forced() {
        let collector = SpanCollector::new();
        let provider = provider(&collector);
        let tracer = provider.tracer("deferred-tests");
        let deferred = DeferredSpans::current().unwrap();

        deferred.end_after(tracer.start("quick"), Duration::from_millis(10));
        deferred.end_after(tracer.start("slow"), Duration::from_secs(30));

        let report = deferred.wait(Duration::from_secs(1)).await;
        assert_eq!(report, DrainReport { completed: 1, forced: 1 });

        let slow = collector.named("slow");
        assert_eq!(slow.len(), 1);
        assert!(matches!(slow[0].status, Status::Error { .. }));
        assert_eq!(deferred.outstanding(), 0);
    }
}
