use std::sync::OnceLock;

use opentelemetry::trace::{Link, SpanContext, SpanId, TraceId};
use opentelemetry::KeyValue;

use crate::common::{Error, Result, ATTR_LINK_NAME, STARTUP_LINK_NAME};

/// An immutable reference to the span every window is causally linked to.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkDescriptor {
    span_context: SpanContext,
}

impl LinkDescriptor {
    pub fn span_context(&self) -> &SpanContext {
        &self.span_context
    }

    pub fn trace_id(&self) -> TraceId {
        self.span_context.trace_id()
    }

    pub fn span_id(&self) -> SpanId {
        self.span_context.span_id()
    }

    /// A non-parenting link, suitable for `SpanBuilder::with_links`.
    pub fn to_link(&self) -> Link {
        Link::new(
            self.span_context.clone(),
            vec![KeyValue::new(ATTR_LINK_NAME, STARTUP_LINK_NAME)],
        )
    }
}

/// Holds the startup span's context for the lifetime of a run.
#[derive(Debug, Default)]
pub struct LinkRegistry {
    captured: OnceLock<LinkDescriptor>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the reference span. Only the first capture of a run is accepted.
    pub fn capture(&self, span_context: &SpanContext) -> Result<LinkDescriptor> {
        if !span_context.is_valid() {
            return Err(Error::InvalidSpanContext);
        }

        let descriptor = LinkDescriptor {
            span_context: span_context.clone(),
        };
        self.captured
            .set(descriptor.clone())
            .map_err(|_| Error::LinkAlreadyCaptured)?;
        Ok(descriptor)
    }

    /// `None` until [`LinkRegistry::capture`] succeeds; afterwards always the same descriptor.
    pub fn get(&self) -> Option<LinkDescriptor> {
        self.captured.get().cloned()
    }
}
