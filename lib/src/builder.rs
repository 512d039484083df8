use std::io::Write;

use opentelemetry::KeyValue;
use opentelemetry_api::global;
use opentelemetry_sdk::export::trace::SpanExporter;
use opentelemetry_sdk::trace::{Builder as ProviderBuilder, SpanProcessor, TracerProvider};
use opentelemetry_sdk::Resource;

use crate::backend::TracingBackend;
use crate::common::{Error, Result};
use crate::spans::JsonLinesExporter;

/// The async runtime to use with OpenTelemetry-Rust's batch span processor.
/// Without one, spans are exported by the SDK's simple processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineRuntime {
    #[cfg(any(feature = "rt-tokio"))]
    #[cfg_attr(docsrs, doc(cfg(feature = "rt-tokio")))]
    Tokio,
    #[cfg(any(feature = "rt-tokio-current-thread"))]
    #[cfg_attr(docsrs, doc(cfg(feature = "rt-tokio-current-thread")))]
    TokioCurrentThread,
}

type Stage = Box<dyn FnOnce(ProviderBuilder) -> ProviderBuilder>;

fn attach_exporter<E>(
    provider_builder: ProviderBuilder,
    exporter: E,
    runtime: Option<PipelineRuntime>,
) -> ProviderBuilder
where
    E: SpanExporter + 'static,
{
    match runtime {
        None => provider_builder.with_simple_exporter(exporter),
        #[cfg(any(feature = "rt-tokio"))]
        Some(PipelineRuntime::Tokio) => {
            provider_builder.with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
        }
        #[cfg(any(feature = "rt-tokio-current-thread"))]
        Some(PipelineRuntime::TokioCurrentThread) => provider_builder
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::TokioCurrentThread),
        #[cfg(not(any(feature = "rt-tokio", feature = "rt-tokio-current-thread")))]
        Some(_) => provider_builder.with_simple_exporter(exporter),
    }
}

/// Create a pipeline builder by calling [`new_pipeline`].
pub struct PipelineBuilder {
    service_name: String,
    runtime: Option<PipelineRuntime>,
    trace_config: Option<opentelemetry_sdk::trace::Config>,
    stages: Vec<Stage>,
    install_error_handler: bool,
}

/// Create a pipeline builder for `service_name`. After configuring the builder,
/// call [`PipelineBuilder::install`] to get a [`TracingBackend`].
///
/// The backend is never registered as the global tracer provider; the caller
/// owns it and hands its tracers to whatever needs them.
pub fn new_pipeline(service_name: &str) -> PipelineBuilder {
    PipelineBuilder {
        service_name: service_name.to_owned(),
        runtime: None,
        trace_config: None,
        stages: Vec::new(),
        install_error_handler: true,
    }
}

impl PipelineBuilder {
    /// Assign the SDK trace configuration. This replaces the default
    /// configuration, including the `service.name` resource.
    pub fn with_trace_config(mut self, config: opentelemetry_sdk::trace::Config) -> Self {
        self.trace_config = Some(config);
        self
    }

    /// Export spans in batches on the given runtime.
    /// Must be called before any exporter is added to take effect for it.
    pub fn with_async_runtime(mut self, runtime: PipelineRuntime) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Send spans to any SDK span exporter.
    pub fn with_exporter<E>(mut self, exporter: E) -> Self
    where
        E: SpanExporter + 'static,
    {
        let runtime = self.runtime;
        self.stages.push(Box::new(move |provider_builder| {
            attach_exporter(provider_builder, exporter, runtime)
        }));
        self
    }

    /// Write spans as JSON lines to `writer`.
    pub fn with_json_exporter<W>(self, writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        self.with_exporter(JsonLinesExporter::new(writer))
    }

    pub fn with_stdout_exporter(self) -> Self {
        self.with_exporter(JsonLinesExporter::stdout())
    }

    /// Add a span processor that sees every span synchronously.
    pub fn with_span_processor<P>(mut self, processor: P) -> Self
    where
        P: SpanProcessor + 'static,
    {
        self.stages.push(Box::new(move |provider_builder| {
            provider_builder.with_span_processor(processor)
        }));
        self
    }

    /// Leave the OpenTelemetry global error handler alone. By default export
    /// failures are logged through `tracing`.
    pub fn without_error_handler(mut self) -> Self {
        self.install_error_handler = false;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            return Err(Error::InvalidConfig("service name must not be empty".into()));
        }

        if self.stages.is_empty() {
            return Err(Error::InvalidConfig(
                "no span exporter or processor was configured".into(),
            ));
        }

        if self.runtime.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::InvalidConfig(
                "batch export requires a running tokio runtime".into(),
            ));
        }

        Ok(())
    }

    /// Build the tracer provider.
    pub fn install(self) -> Result<TracingBackend> {
        self.validate()?;

        let mut provider_builder = TracerProvider::builder();
        for stage in self.stages {
            provider_builder = stage(provider_builder);
        }

        let config = match self.trace_config {
            Some(config) => config,
            None => opentelemetry_sdk::trace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", self.service_name.clone()),
            ])),
        };
        let provider = provider_builder.with_config(config).build();

        if self.install_error_handler {
            let handler = global::set_error_handler(|error| {
                tracing::warn!(%error, "tracing backend error");
            });
            if let Err(err) = handler {
                tracing::debug!(%err, "could not install the OpenTelemetry error handler");
            }
        }

        tracing::debug!(service = %self.service_name, "installed tracing pipeline");
        Ok(TracingBackend::new(provider, self.service_name))
    }
}
