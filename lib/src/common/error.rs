use opentelemetry::trace::TraceError;

/// Errors surfaced by the aggregation engine.
///
/// Job failures are never represented here; they are counted on the window
/// or summary span instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration could not be parsed: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("window {index} is still open")]
    WindowAlreadyOpen { index: u64 },

    #[error("no window is open")]
    WindowNotOpen,

    #[error("the startup span context was already captured")]
    LinkAlreadyCaptured,

    #[error("span context is not valid")]
    InvalidSpanContext,

    #[error("the run summary was already emitted")]
    SummaryAlreadyEmitted,

    #[error("tracing backend error: {0}")]
    Backend(#[from] TraceError),

    #[error("job worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// An I/O failure while writing exported spans.
#[derive(Debug)]
pub struct ExportFailure {
    pub kind: std::io::ErrorKind,
    pub message: String,
}

impl From<std::io::Error> for ExportFailure {
    fn from(err: std::io::Error) -> Self {
        ExportFailure {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}: {}", self.kind, self.message))
    }
}
impl std::error::Error for ExportFailure {}

impl opentelemetry::ExportError for ExportFailure {
    fn exporter_name(&self) -> &'static str {
        "JSON lines"
    }
}
