//! # Windowed batch tracing
//!
//! Per-job spans do not scale for batch schedulers that run hundreds of
//! thousands of short jobs: the backend fills up with spans nobody reads, and
//! the interesting part (which jobs failed, and why) is spread across all of
//! them. This crate aggregates job outcomes into **window spans** instead.
//!
//! A window covers a contiguous range of job numbers. It is closed (and a new
//! one opened) when either threshold in the [`RotationPolicy`] is reached:
//!
//! - `max_jobs_per_window` jobs have been dispatched into it, or
//! - it has been open for `max_window_duration`. A window that stops receiving
//!   jobs is flushed once this deadline passes, so no counts are held back.
//!
//! On close, the window span gets its ending job number, success and failure
//! counts, and either a count per [`ErrorCategory`] or the free-text error
//! message count, depending on [`ErrorMode`].
//!
//! Every window is the root of its own trace. Each carries a link to the
//! startup span created by [`RunContext::evaluate`], so all windows of a run can
//! be found from it.
//!
//! In summary mode ([`AggregatorConfig::with_summary_mode`]) no windows are
//! written; a single [`SummaryEmitter`] span is emitted at the end of the run.
//!
//! # Shutdown
//!
//! Executors may hand sub-step spans to [`DeferredSpans::end_after`]. Shutting
//! the backend down with [`TracingBackend::shutdown`] waits for those, up to
//! a grace period, ends whatever is left with an error status, and flushes the
//! span processors.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use opentelemetry::Context;
//! use opentelemetry_batch_windows::*;
//!
//! # async fn run() -> Result<()> {
//! let config = AggregatorConfig::default().with_max_jobs_per_window(100);
//! let backend = new_pipeline(&config.service_name)
//!     .with_stdout_exporter()
//!     .install()?;
//!
//! let links = Arc::new(LinkRegistry::new());
//! let run = RunContext::evaluate(
//!     &backend.tracer(),
//!     &links,
//!     RunParameters { run_id: 1, queue_depth: 1000 },
//!     config.startup_span,
//! )?;
//!
//! let controller = WindowController::new(backend.tracer(), &config, links);
//! let executor = |_cx: &Context, job: JobNumber| JobOutcome::succeeded(job);
//! let report = AggregationDriver::new(controller, Arc::new(executor))
//!     .run(sequential_jobs(1000))
//!     .await?;
//! assert_eq!(report.windows_closed, 10);
//!
//! run.finish();
//! backend.shutdown(None, config.shutdown_grace_period).await?;
//! # Ok(())
//! # }
//! ```
mod aggregator_traits;
mod backend;
mod builder;
mod common;
mod config;
mod deferred;
mod driver;
mod outcome;
mod propagation;
mod startup;
mod window;

pub mod spans;

pub use aggregator_traits::*;
pub use backend::*;
pub use builder::*;
pub use common::*;
pub use config::*;
pub use deferred::*;
pub use driver::*;
pub use outcome::*;
pub use propagation::*;
pub use startup::*;
pub use window::*;
