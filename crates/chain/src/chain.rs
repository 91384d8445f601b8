use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use admission_core_types::{AdmissionError, Attributes, Operation};
use admission_observe::{GlobalSink, MetricsSink, Step};
use tracing::debug;

use crate::handler::{Handler, MutatingHandler, NamedHandler, ValidatingHandler};

/// Ordered, immutable sequence of admission handlers.
///
/// Both phases walk the handlers in declaration order and stop at the first
/// error, which is returned unchanged. Mutations applied before a failure
/// remain on the proposed object.
pub struct Chain {
    handlers: Vec<NamedHandler>,
    sink: Arc<dyn MetricsSink>,
}

impl Chain {
    /// Chain reporting to the process-wide metrics sink.
    pub fn new(handlers: Vec<NamedHandler>) -> Self {
        Self::with_sink(handlers, Arc::new(GlobalSink))
    }

    pub fn with_sink(handlers: Vec<NamedHandler>, sink: Arc<dyn MetricsSink>) -> Self {
        Self { handlers, sink }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn handlers(&self) -> &[NamedHandler] {
        &self.handlers
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(NamedHandler::name).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs every mutating handler that handles the request's operation.
    pub fn mutate(&self, attributes: &mut Attributes) -> Result<(), AdmissionError> {
        let mut scope = PhaseScope::enter(self.sink.as_ref(), Step::Mutating, attributes);
        let operation = scope.attributes.operation();

        for entry in &self.handlers {
            if !entry.handler().handles(operation) {
                continue;
            }
            let Some(mutator) = entry.handler().as_mutating() else {
                continue;
            };
            let started = Instant::now();
            let result = mutator.admit(&mut *scope.attributes);
            self.sink.observe_admission_controller(
                started.elapsed(),
                result.is_err(),
                entry.name(),
                &*scope.attributes,
                Step::Mutating,
            );
            if let Err(err) = result {
                debug!(handler = entry.name(), %operation, error = %err, "mutating admission rejected request");
                scope.fail();
                return Err(err);
            }
        }
        Ok(())
    }

    /// Runs every validating handler that handles the request's operation.
    pub fn validate(&self, attributes: &Attributes) -> Result<(), AdmissionError> {
        let mut scope = PhaseScope::enter(self.sink.as_ref(), Step::Validating, attributes);
        let operation = scope.attributes.operation();

        for entry in &self.handlers {
            if !entry.handler().handles(operation) {
                continue;
            }
            let Some(validator) = entry.handler().as_validating() else {
                continue;
            };
            let started = Instant::now();
            let result = validator.validate(scope.attributes);
            self.sink.observe_admission_controller(
                started.elapsed(),
                result.is_err(),
                entry.name(),
                scope.attributes,
                Step::Validating,
            );
            if let Err(err) = result {
                debug!(handler = entry.name(), %operation, error = %err, "validating admission rejected request");
                scope.fail();
                return Err(err);
            }
        }
        Ok(())
    }

    /// True if any handler handles `operation`, whatever its capabilities.
    pub fn handles(&self, operation: Operation) -> bool {
        self.handlers
            .iter()
            .any(|entry| entry.handler().handles(operation))
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("handlers", &self.handlers)
            .finish_non_exhaustive()
    }
}

// A chain can be nested inside another chain as a single handler.
impl Handler for Chain {
    fn handles(&self, operation: Operation) -> bool {
        Chain::handles(self, operation)
    }

    fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
        Some(self)
    }

    fn as_validating(&self) -> Option<&dyn ValidatingHandler> {
        Some(self)
    }
}

impl MutatingHandler for Chain {
    fn admit(&self, attributes: &mut Attributes) -> Result<(), AdmissionError> {
        self.mutate(attributes)
    }
}

impl ValidatingHandler for Chain {
    fn validate(&self, attributes: &Attributes) -> Result<(), AdmissionError> {
        Chain::validate(self, attributes)
    }
}

/// Emits the step observation when the phase ends, however it ends.
/// Unwinding out of a handler counts as a failure.
struct PhaseScope<'s, A>
where
    A: Deref<Target = Attributes>,
{
    sink: &'s dyn MetricsSink,
    step: Step,
    started: Instant,
    failed: bool,
    attributes: A,
}

impl<'s, A> PhaseScope<'s, A>
where
    A: Deref<Target = Attributes>,
{
    fn enter(sink: &'s dyn MetricsSink, step: Step, attributes: A) -> Self {
        Self {
            sink,
            step,
            started: Instant::now(),
            failed: false,
            attributes,
        }
    }

    fn fail(&mut self) {
        self.failed = true;
    }
}

impl<A> Drop for PhaseScope<'_, A>
where
    A: Deref<Target = Attributes>,
{
    fn drop(&mut self) {
        let failed = self.failed || std::thread::panicking();
        self.sink
            .observe_admission_step(self.started.elapsed(), failed, &self.attributes, self.step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::OperationSet;
    use admission_core_types::GroupVersionResource;
    use admission_observe::recorder::Observation;
    use admission_observe::RecordingSink;

    struct Labeler {
        operations: OperationSet,
    }

    impl Handler for Labeler {
        fn handles(&self, operation: Operation) -> bool {
            self.operations.contains(operation)
        }

        fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
            Some(self)
        }
    }

    impl MutatingHandler for Labeler {
        fn admit(&self, attributes: &mut Attributes) -> Result<(), AdmissionError> {
            if let Some(object) = attributes.object_mut() {
                object["labeled"] = serde_json::json!(true);
            }
            Ok(())
        }
    }

    struct Panicker;

    impl Handler for Panicker {
        fn handles(&self, _operation: Operation) -> bool {
            true
        }

        fn as_validating(&self) -> Option<&dyn ValidatingHandler> {
            Some(self)
        }
    }

    impl ValidatingHandler for Panicker {
        fn validate(&self, _attributes: &Attributes) -> Result<(), AdmissionError> {
            panic!("handler bug");
        }
    }

    fn create_pod() -> Attributes {
        Attributes::builder(Operation::Create, GroupVersionResource::new("", "v1", "pods"))
            .object(serde_json::json!({}))
            .build()
    }

    #[test]
    fn mutation_is_visible_after_phase() {
        let sink = Arc::new(RecordingSink::new());
        let chain = Chain::with_sink(
            vec![NamedHandler::new(
                "labeler",
                Labeler {
                    operations: OperationSet::all(),
                },
            )],
            sink.clone(),
        );
        let mut attrs = create_pod();
        chain.mutate(&mut attrs).unwrap();
        assert_eq!(attrs.object().unwrap()["labeled"], true);
        assert_eq!(sink.handlers_for(Step::Mutating), vec!["labeler".to_string()]);
    }

    #[test]
    fn step_observation_fires_when_handler_panics() {
        let sink = Arc::new(RecordingSink::new());
        let chain = Chain::with_sink(vec![NamedHandler::new("panicker", Panicker)], sink.clone());
        let attrs = create_pod();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = chain.validate(&attrs);
        }));
        assert!(outcome.is_err());

        let steps = sink.step_observations();
        assert_eq!(steps.len(), 1);
        assert!(steps[0].failed);
        assert!(sink.controller_observations().is_empty());
    }

    #[test]
    fn nested_chain_acts_as_single_handler() {
        let sink = Arc::new(RecordingSink::new());
        let inner = Chain::with_sink(
            vec![NamedHandler::new(
                "labeler",
                Labeler {
                    operations: OperationSet::new([Operation::Create]),
                },
            )],
            sink.clone(),
        );
        let outer = Chain::with_sink(vec![NamedHandler::new("inner", inner)], sink.clone());
        assert!(outer.handles(Operation::Create));
        assert!(!outer.handles(Operation::Update));

        let mut attrs = create_pod();
        outer.mutate(&mut attrs).unwrap();

        let kinds: Vec<&str> = sink
            .observations()
            .iter()
            .map(|event| match event {
                Observation::Controller(obs) => {
                    if obs.handler == "labeler" {
                        "labeler"
                    } else {
                        "inner"
                    }
                }
                Observation::Step(_) => "step",
            })
            .collect();
        assert_eq!(kinds, vec!["labeler", "step", "inner", "step"]);
    }

    #[test]
    fn debug_lists_handler_names() {
        let chain = Chain::with_sink(
            vec![NamedHandler::new(
                "labeler",
                Labeler {
                    operations: OperationSet::all(),
                },
            )],
            Arc::new(admission_observe::NoopSink),
        );
        let rendered = format!("{chain:?}");
        assert!(rendered.contains("labeler"));
        assert_eq!(chain.names(), vec!["labeler"]);
        assert_eq!(chain.len(), 1);
    }
}
