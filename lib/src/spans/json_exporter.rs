use std::fmt::Debug;
use std::io::Write;

use futures_util::future::BoxFuture;
use opentelemetry::trace::{SpanId, SpanKind, Status, TraceError};
use opentelemetry_sdk::export::trace::{ExportResult, SpanData, SpanExporter};
use serde_json::json;

use crate::common::json::attributes_to_json;
use crate::common::ExportFailure;

fn timestamp(time: std::time::SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn kind_name(kind: &SpanKind) -> &'static str {
    match kind {
        SpanKind::Client => "Client",
        SpanKind::Server => "Server",
        SpanKind::Producer => "Producer",
        SpanKind::Consumer => "Consumer",
        SpanKind::Internal => "Internal",
    }
}

/// Render one finished span as a JSON object.
pub fn span_to_json(span: &SpanData) -> serde_json::Value {
    let status = match &span.status {
        Status::Unset => json!({ "code": "Unset" }),
        Status::Ok => json!({ "code": "Ok" }),
        Status::Error { description } => {
            json!({ "code": "Error", "description": description.to_string() })
        }
    };

    let events: Vec<serde_json::Value> = span
        .events
        .iter()
        .map(|event| {
            json!({
                "name": event.name.to_string(),
                "time": timestamp(event.timestamp),
                "attributes": attributes_to_json(
                    event.attributes.iter().map(|kv| (&kv.key, &kv.value))
                ),
            })
        })
        .collect();

    let links: Vec<serde_json::Value> = span
        .links
        .iter()
        .map(|link| {
            json!({
                "traceId": link.span_context.trace_id().to_string(),
                "spanId": link.span_context.span_id().to_string(),
            })
        })
        .collect();

    let parent_id = if span.parent_span_id == SpanId::INVALID {
        serde_json::Value::Null
    } else {
        serde_json::Value::String(span.parent_span_id.to_string())
    };

    let duration = span
        .end_time
        .duration_since(span.start_time)
        .unwrap_or_default();

    json!({
        "name": span.name.to_string(),
        "kind": kind_name(&span.span_kind),
        "traceId": span.span_context.trace_id().to_string(),
        "spanId": span.span_context.span_id().to_string(),
        "parentId": parent_id,
        "startTime": timestamp(span.start_time),
        "endTime": timestamp(span.end_time),
        "durationMicros": u64::try_from(duration.as_micros()).unwrap_or(u64::MAX),
        "status": status,
        "attributes": attributes_to_json(span.attributes.iter()),
        "events": events,
        "links": links,
    })
}

/// Writes each exported span as one line of JSON.
pub struct JsonLinesExporter<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesExporter<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesExporter { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_batch(&mut self, batch: &[SpanData]) -> std::io::Result<()> {
        for span in batch {
            serde_json::to_writer(&mut self.writer, &span_to_json(span))?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()
    }
}

impl JsonLinesExporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> Debug for JsonLinesExporter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonLinesExporter").finish_non_exhaustive()
    }
}

impl<W: Write + Send> SpanExporter for JsonLinesExporter<W> {
    fn export(&mut self, batch: Vec<SpanData>) -> BoxFuture<'static, ExportResult> {
        let result = self
            .write_batch(&batch)
            .map_err(|err| TraceError::ExportFailed(Box::new(ExportFailure::from(err))));

        Box::pin(std::future::ready(result))
    }

    fn shutdown(&mut self) {
        let _ = self.writer.flush();
    }
}
