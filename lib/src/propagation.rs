use std::collections::HashMap;

use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::Context;
use opentelemetry_sdk::propagation::TraceContextPropagator;

/// W3C `traceparent`/`tracestate` headers for the span in `cx`.
pub fn inject_context(cx: &Context) -> HashMap<String, String> {
    let mut carrier = HashMap::new();
    TraceContextPropagator::new().inject_context(cx, &mut carrier);
    carrier
}

/// A context whose remote parent is described by `carrier`. Missing or
/// malformed headers yield a context without a span.
pub fn extract_context(carrier: &HashMap<String, String>) -> Context {
    TraceContextPropagator::new().extract_with_context(&Context::new(), carrier)
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("request to {url} failed: {reason}")]
    Failed { url: String, reason: String },
}

/// An outbound request carrying the caller's trace context in its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
}

impl OutboundRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>, cx: &Context) -> Self {
        OutboundRequest {
            method: method.into(),
            url: url.into(),
            headers: inject_context(cx),
        }
    }

    /// The authority part of the url, including any port.
    pub fn host(&self) -> Result<&str, TransportError> {
        let rest = match self.url.split_once("://") {
            Some((_, rest)) => rest,
            None => return Err(TransportError::InvalidUrl(self.url.clone())),
        };
        let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
        if host.is_empty() {
            return Err(TransportError::InvalidUrl(self.url.clone()));
        }
        Ok(host)
    }

    /// The request as text: request line, host, then headers with lower-cased
    /// names in sorted order.
    pub fn format(&self) -> String {
        let mut lines = vec![
            format!("{} {} HTTP/1.1", self.method, self.url),
            format!("Host: {}", self.host().unwrap_or_default()),
        ];

        let mut headers: Vec<(String, &str)> = self
            .headers
            .iter()
            .map(|(name, value)| (name.to_lowercase(), value.as_str()))
            .collect();
        headers.sort();
        lines.extend(
            headers
                .into_iter()
                .map(|(name, value)| format!("{}: {}", name, value)),
        );

        lines.join("\n")
    }

    /// The context a receiving service would continue from.
    pub fn remote_context(&self) -> Context {
        extract_context(&self.headers)
    }
}

/// Sends outbound requests on behalf of a job.
pub trait Transport: Send + Sync {
    fn send(&self, request: &OutboundRequest) -> Result<(), TransportError>;
}

/// A transport that only logs what it would have sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTransport;

impl Transport for LoggingTransport {
    fn send(&self, request: &OutboundRequest) -> Result<(), TransportError> {
        request.host()?;
        tracing::debug!(request = %request.format(), "outbound request");
        Ok(())
    }
}
