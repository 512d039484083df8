use opentelemetry::trace::{Span, SpanContext, SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

use crate::common::*;
use crate::config::StartupSpanPolicy;
use crate::window::{LinkDescriptor, LinkRegistry};

/// What the scheduler found when it looked at its queue before the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunParameters {
    pub run_id: u64,
    pub queue_depth: u64,
}

/// The startup evaluation of a run: a root span with a nested child and
/// grandchild, whose context every window links back to.
pub struct RunContext {
    root: Option<Context>,
    link: LinkDescriptor,
}

impl RunContext {
    /// Emit the startup span tree and capture its root into `links`.
    pub fn evaluate<T>(
        tracer: &T,
        links: &LinkRegistry,
        parameters: RunParameters,
        policy: StartupSpanPolicy,
    ) -> Result<RunContext>
    where
        T: Tracer,
        T::Span: Send + Sync + 'static,
    {
        if links.get().is_some() {
            return Err(Error::LinkAlreadyCaptured);
        }

        let builder = tracer
            .span_builder(STARTUP_SPAN_NAME)
            .with_kind(SpanKind::Internal)
            .with_attributes(vec![KeyValue::new(
                ATTR_JOB_RUN,
                attr_int(parameters.run_id),
            )]);
        let root = tracer.build_with_context(builder, &Context::new());
        let span_context = root.span_context().clone();
        let root_cx = Context::new().with_span(root);

        let mut child = tracer.start_with_context(STARTUP_CHILD_SPAN_NAME, &root_cx);
        child.set_attribute(KeyValue::new(
            ATTR_QUEUE_DEPTH,
            attr_int(parameters.queue_depth),
        ));
        let child_cx = root_cx.with_span(child);

        let mut grandchild = tracer.start_with_context(STARTUP_GRANDCHILD_SPAN_NAME, &child_cx);
        grandchild.set_attribute(KeyValue::new(ATTR_ERRORS, false));
        grandchild.end();
        child_cx.span().end();

        let link = links.capture(&span_context)?;
        tracing::info!(
            run = parameters.run_id,
            queue_depth = parameters.queue_depth,
            trace_id = %span_context.trace_id(),
            "evaluated queue and environment"
        );

        let root = match policy {
            StartupSpanPolicy::CloseImmediately => {
                root_cx.span().end();
                None
            }
            StartupSpanPolicy::KeepOpen => Some(root_cx),
        };

        Ok(RunContext { root, link })
    }

    pub fn link(&self) -> &LinkDescriptor {
        &self.link
    }

    pub fn span_context(&self) -> &SpanContext {
        self.link.span_context()
    }

    /// Whether the root span is still open.
    pub fn is_open(&self) -> bool {
        self.root.is_some()
    }

    /// End the root span, if it was kept open.
    pub fn finish(mut self) {
        if let Some(root) = self.root.take() {
            root.span().end();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spans::{bool_attribute, int_attribute, SpanCollector};
    use opentelemetry::trace::TracerProvider as _;

    fn setup() -> (SpanCollector, opentelemetry_sdk::trace::TracerProvider) {
        let collector = SpanCollector::new();
        let provider = opentelemetry_sdk::trace::TracerProvider::builder()
            .with_span_processor(collector.clone())
            .build();
        (collector, provider)
    }

    #[test]
    fn builds_three_level_tree() {
        let (collector, provider) = setup();
        let links = LinkRegistry::new();
        let run = RunContext::evaluate(
            &provider.tracer("startup-tests"),
            &links,
            RunParameters {
                run_id: 9,
                queue_depth: 1000,
            },
            StartupSpanPolicy::CloseImmediately,
        )
        .unwrap();
        assert!(!run.is_open());

        let root = &collector.named(STARTUP_SPAN_NAME)[0];
        let child = &collector.named(STARTUP_CHILD_SPAN_NAME)[0];
        let grandchild = &collector.named(STARTUP_GRANDCHILD_SPAN_NAME)[0];

        assert_eq!(int_attribute(root, ATTR_JOB_RUN), Some(9));
        assert_eq!(int_attribute(child, ATTR_QUEUE_DEPTH), Some(1000));
        assert_eq!(bool_attribute(grandchild, ATTR_ERRORS), Some(false));
        assert_eq!(child.parent_span_id, root.span_context.span_id());
        assert_eq!(grandchild.parent_span_id, child.span_context.span_id());

        assert_eq!(links.get().as_ref(), Some(run.link()));
        assert_eq!(run.span_context(), &root.span_context);
    }

    #[test]
    fn keep_open_defers_root_end() {
        let (collector, provider) = setup();
        let links = LinkRegistry::new();
        let run = RunContext::evaluate(
            &provider.tracer("startup-tests"),
            &links,
            RunParameters {
                run_id: 1,
                queue_depth: 3,
            },
            StartupSpanPolicy::KeepOpen,
        )
        .unwrap();

        assert!(run.is_open());
        assert!(collector.named(STARTUP_SPAN_NAME).is_empty());
        run.finish();
        assert_eq!(collector.named(STARTUP_SPAN_NAME).len(), 1);
    }

    #[test]
    fn second_evaluation_is_rejected() {
        let (_collector, provider) = setup();
        let tracer = provider.tracer("startup-tests");
        let links = LinkRegistry::new();
        let parameters = RunParameters {
            run_id: 1,
            queue_depth: 0,
        };

        RunContext::evaluate(&tracer, &links, parameters, StartupSpanPolicy::CloseImmediately)
            .unwrap();
        assert!(matches!(
            RunContext::evaluate(&tracer, &links, parameters, StartupSpanPolicy::CloseImmediately),
            Err(Error::LinkAlreadyCaptured)
        ));
    }
}
