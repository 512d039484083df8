/// Root of the startup evaluation tree. Its span context seeds the link registry.
pub const STARTUP_SPAN_NAME: &str = "Evaluate the queue and environment";
pub const STARTUP_CHILD_SPAN_NAME: &str = "Child span for evaluating the queue";
pub const STARTUP_GRANDCHILD_SPAN_NAME: &str = "Grandchild span reporting no errors";

pub const WINDOW_SPAN_NAME: &str = "job window";
/// Parent of the per-message spans in free-text fan-out mode. One per window.
pub const ERRORS_SPAN_NAME: &str = "errors";
pub const ERROR_MESSAGE_SPAN_NAME: &str = "job error";
pub const SUMMARY_SPAN_NAME: &str = "End of batch run summary";

/// Value of the `name` attribute carried by every window's link to the startup span.
pub const STARTUP_LINK_NAME: &str = "Link to job start";

pub const ATTR_LINK_NAME: &str = "name";
pub const ATTR_JOB_RUN: &str = "job.run";
pub const ATTR_JOB_NUMBER: &str = "job.number";
pub const ATTR_JOB_EMITTED_BY: &str = "job.emitted_by";
pub const ATTR_QUEUE_DEPTH: &str = "queue.depth";
pub const ATTR_ERRORS: &str = "errors";
pub const ATTR_ERROR_MESSAGE: &str = "error.message";

pub const ATTR_WINDOW_INDEX: &str = "window.index";
pub const ATTR_WINDOW_STARTING_JOB: &str = "window.starting_job_number";
pub const ATTR_WINDOW_ENDING_JOB: &str = "window.ending_job_number";
pub const ATTR_WINDOW_SUCCESS_COUNT: &str = "window.success.count";
pub const ATTR_WINDOW_FAILURE_COUNT: &str = "window.failure.count";
pub const ATTR_WINDOW_ERROR_MESSAGE_COUNT: &str = "window.error_message.count";
pub const ATTR_WINDOW_FAILED_JOB_IDS: &str = "window.failed_job.ids";

pub const ATTR_SUMMARY_FAILED_JOB_IDS: &str = "summary.failed_job.ids";
pub const ATTR_SUMMARY_FAILED_COUNT: &str = "summary.failed.count";
pub const ATTR_SUMMARY_SUCCESS_COUNT: &str = "summary.success.count";
pub const ATTR_SUMMARY_ERROR_MESSAGE_COUNT: &str = "summary.error_message.count";

pub const EMITTED_BY_SCHEDULER: &str = "scheduler";

/// Name of the tracer handed out by [`crate::TracingBackend::tracer`] when no name is given.
pub const DEFAULT_TRACER_NAME: &str = "opentelemetry-batch-windows";

/// How many closed windows a [`crate::RunReport`] remembers.
pub const MAX_RETAINED_WINDOW_REPORTS: usize = 1024;
