use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::{Tracer, TracerProvider};

use crate::common::{Error, Result, DEFAULT_TRACER_NAME};
use crate::deferred::{DeferredSpans, DrainReport};

/// The tracer provider for one process, owned by whoever built it.
///
/// Tracers handed out by [`TracingBackend::tracer`] stop recording once the
/// backend has been shut down.
pub struct TracingBackend {
    provider: TracerProvider,
    service_name: String,
}

impl TracingBackend {
    pub(crate) fn new(provider: TracerProvider, service_name: String) -> Self {
        TracingBackend {
            provider,
            service_name,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn tracer(&self) -> Tracer {
        self.named_tracer(DEFAULT_TRACER_NAME)
    }

    pub fn named_tracer(&self, name: &'static str) -> Tracer {
        self.provider
            .versioned_tracer(name, Some(env!("CARGO_PKG_VERSION")), None)
    }

    /// Drain deferred span closes (bounded by `grace`), flush every span
    /// processor, then release the provider.
    pub async fn shutdown(
        self,
        deferred: Option<&DeferredSpans>,
        grace: Duration,
    ) -> Result<DrainReport> {
        let drained = match deferred {
            Some(deferred) => deferred.wait(grace).await,
            None => DrainReport::default(),
        };

        let provider = self.provider;
        let flushed = tokio::task::spawn_blocking(move || {
            let results = provider.force_flush();
            // Dropping the last handle shuts the span processors down.
            drop(provider);
            results
        })
        .await?;

        let mut failure = None;
        for result in flushed {
            if let Err(err) = result {
                tracing::warn!(%err, "span processor failed to flush");
                failure.get_or_insert(err);
            }
        }

        tracing::debug!(
            completed = drained.completed,
            forced = drained.forced,
            "tracing backend shut down"
        );

        match failure {
            Some(err) => Err(Error::Backend(err)),
            None => Ok(drained),
        }
    }
}

impl std::fmt::Debug for TracingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingBackend")
            .field("service_name", &self.service_name)
            .finish_non_exhaustive()
    }
}
