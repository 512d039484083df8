use std::time::Instant;

use opentelemetry::Context;

use crate::common::Result;
use crate::outcome::{JobNumber, JobOutcome};
use crate::window::{ClosedWindow, RunSummary};

/// Runs one job. Implementations are called from worker threads and must not
/// assume any ordering between jobs when more than one worker is configured.
///
/// `cx` carries the span of the window the job belongs to (or no span in
/// summary mode). Spans the executor starts under it become children of that window.
pub trait JobExecutor: Send + Sync + 'static {
    fn run(&self, cx: &Context, job: JobNumber) -> JobOutcome;
}

impl<F> JobExecutor for F
where
    F: Fn(&Context, JobNumber) -> JobOutcome + Send + Sync + 'static,
{
    fn run(&self, cx: &Context, job: JobNumber) -> JobOutcome {
        self(cx, job)
    }
}

/// The span that was written when an aggregator was finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Flushed {
    Window(ClosedWindow),
    Summary(RunSummary),
}

/// What the driver needs from a windowing strategy.
pub trait Aggregator: Send {
    /// Whether `job` must start a new window.
    fn should_rotate(&self, job: JobNumber, now: Instant) -> bool;

    /// Close the open window and open the next one starting at `job`.
    fn rotate(&mut self, job: JobNumber, now: Instant) -> Result<Option<ClosedWindow>>;

    /// The context `job` runs under, opening a window if none is open.
    fn context_for(&mut self, job: JobNumber, now: Instant) -> Result<Context>;

    fn record(&self, outcome: &JobOutcome);

    /// When the open window must be flushed if nothing else happens first.
    fn idle_deadline(&self) -> Option<Instant>;

    fn flush_idle(&mut self, now: Instant) -> Result<Option<ClosedWindow>>;

    /// Write out whatever is still open. Called exactly once, at end of run.
    fn finish(&mut self) -> Result<Option<Flushed>>;
}
