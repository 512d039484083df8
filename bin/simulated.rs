use std::sync::Arc;
use std::time::Duration;

use opentelemetry::trace::{Span, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_batch_windows::*;

const WORKER_URL: &str = "http://localhost:7777/";

/// Stands in for real job work. Failures are a deterministic function of the
/// job number so runs are reproducible.
pub struct SimulatedExecutor {
    tracer: opentelemetry_sdk::trace::Tracer,
    deferred: Arc<DeferredSpans>,
    transport: Arc<dyn Transport>,
    error_mode: ErrorMode,
    job_duration: Duration,
}

impl SimulatedExecutor {
    pub fn new(
        tracer: opentelemetry_sdk::trace::Tracer,
        deferred: Arc<DeferredSpans>,
        transport: Arc<dyn Transport>,
        error_mode: ErrorMode,
        job_duration: Duration,
    ) -> Self {
        SimulatedExecutor {
            tracer,
            deferred,
            transport,
            error_mode,
            job_duration,
        }
    }

    fn categorized(job: JobNumber, sent: &std::result::Result<(), TransportError>) -> JobOutcome {
        let category = if sent.is_err() || job % 23 == 0 {
            Some(ErrorCategory::ConnectionFailure)
        } else if job % 17 == 0 {
            Some(ErrorCategory::SchedulingFailure)
        } else if job % 29 == 0 {
            Some(ErrorCategory::RecoverableStartupFailure)
        } else if job % 31 == 0 {
            Some(ErrorCategory::QuotaExceeded)
        } else {
            None
        };

        match category {
            Some(category) => JobOutcome::failed(job, category),
            None => JobOutcome::succeeded(job),
        }
    }

    fn free_text(job: JobNumber, sent: std::result::Result<(), TransportError>) -> JobOutcome {
        let mut messages = Vec::new();
        if let Err(err) = sent {
            messages.push(err.to_string());
        }
        if job % 17 == 0 {
            messages.push(format!("job {} could not be scheduled", job));
        }
        if job % 23 == 0 {
            messages.push("connection to the worker pool was reset".to_owned());
        }
        if job % 31 == 0 {
            messages.push("worker quota exceeded".to_owned());
        }
        JobOutcome::from_messages(job, messages)
    }
}

fn job_number_attribute(job: JobNumber) -> KeyValue {
    KeyValue::new(ATTR_JOB_NUMBER, i64::try_from(job).unwrap_or(i64::MAX))
}

impl JobExecutor for SimulatedExecutor {
    fn run(&self, cx: &Context, job: JobNumber) -> JobOutcome {
        let mut span = self.tracer.start_with_context("Start job", cx);
        span.set_attribute(job_number_attribute(job));
        let job_cx = cx.with_span(span);

        // The step's completion signal arrives after the job itself has returned.
        let step = self.tracer.start_with_context("Run job step", &job_cx);
        self.deferred.end_after(step, self.job_duration);

        let request = OutboundRequest::new("GET", WORKER_URL, &job_cx);
        job_cx.span().add_event(
            "WebRequest",
            vec![KeyValue::new("request.as_string", request.format())],
        );
        let sent = self.transport.send(&request);

        if !self.job_duration.is_zero() {
            std::thread::sleep(self.job_duration);
        }

        let outcome = match self.error_mode {
            ErrorMode::Categorized => Self::categorized(job, &sent),
            ErrorMode::FreeText => Self::free_text(job, sent),
        };
        job_cx.span().end();
        outcome
    }
}

/// Make one request from a client span and handle it on the "server" side,
/// continuing the trace from the propagated headers.
pub fn passthrough_request(tracer: &opentelemetry_sdk::trace::Tracer, transport: &dyn Transport) {
    let outer = tracer.start("make outer request");
    let cx = Context::new().with_span(outer);
    let request = OutboundRequest::new("GET", WORKER_URL, &cx);
    if let Err(err) = transport.send(&request) {
        tracing::warn!(%err, "outer request failed");
    }

    let remote = extract_context(&request.headers);
    let mut inner = tracer.start_with_context("handle inner request", &remote);
    inner.end();
    cx.span().end();
}
