use std::sync::{Arc, Mutex};

use opentelemetry::trace::TraceResult;
use opentelemetry::{Context, Value};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::trace::{Span, SpanProcessor};

/// A span processor that keeps every finished span in memory.
///
/// Spans are stored synchronously in `on_end`, so they can be inspected as soon
/// as `end()` returns. Clones share the same storage.
#[derive(Debug, Clone, Default)]
pub struct SpanCollector {
    finished: Arc<Mutex<Vec<SpanData>>>,
}

impl SpanCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finished(&self) -> Vec<SpanData> {
        match self.finished.lock() {
            Ok(finished) => finished.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn named(&self, name: &str) -> Vec<SpanData> {
        self.finished()
            .into_iter()
            .filter(|span| span.name == name)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.finished.lock().map_or(0, |finished| finished.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut finished) = self.finished.lock() {
            finished.clear();
        }
    }
}

impl SpanProcessor for SpanCollector {
    fn on_start(&self, _span: &mut Span, _cx: &Context) {}

    fn on_end(&self, span: SpanData) {
        if let Ok(mut finished) = self.finished.lock() {
            finished.push(span);
        }
    }

    fn force_flush(&self) -> TraceResult<()> {
        Ok(())
    }

    fn shutdown(&mut self) -> TraceResult<()> {
        Ok(())
    }
}

/// Look up an attribute on a finished span by key.
pub fn attribute(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|(k, _)| k.as_str() == key)
        .map(|(_, value)| value.clone())
}

pub fn int_attribute(span: &SpanData, key: &str) -> Option<i64> {
    match attribute(span, key)? {
        Value::I64(value) => Some(value),
        _ => None,
    }
}

pub fn string_attribute(span: &SpanData, key: &str) -> Option<String> {
    match attribute(span, key)? {
        Value::String(value) => Some(value.to_string()),
        _ => None,
    }
}

pub fn bool_attribute(span: &SpanData, key: &str) -> Option<bool> {
    match attribute(span, key)? {
        Value::Bool(value) => Some(value),
        _ => None,
    }
}
