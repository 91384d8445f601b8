//! In-memory sink that keeps every observation in arrival order.

use crate::metrics::{MetricsSink, Step};
use admission_core_types::{Attributes, Operation, RequestId};
use parking_lot::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub struct ControllerObservation {
    pub handler: String,
    pub step: Step,
    pub failed: bool,
    pub operation: Operation,
    pub request: RequestId,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepObservation {
    pub step: Step,
    pub failed: bool,
    pub operation: Operation,
    pub request: RequestId,
    pub elapsed: Duration,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    Controller(ControllerObservation),
    Step(StepObservation),
}

#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Observation>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observations(&self) -> Vec<Observation> {
        self.events.lock().clone()
    }

    pub fn controller_observations(&self) -> Vec<ControllerObservation> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Observation::Controller(obs) => Some(obs.clone()),
                Observation::Step(_) => None,
            })
            .collect()
    }

    pub fn step_observations(&self) -> Vec<StepObservation> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Observation::Step(obs) => Some(obs.clone()),
                Observation::Controller(_) => None,
            })
            .collect()
    }

    /// Handler names observed for `step`, in order.
    pub fn handlers_for(&self, step: Step) -> Vec<String> {
        self.controller_observations()
            .into_iter()
            .filter(|obs| obs.step == step)
            .map(|obs| obs.handler)
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl MetricsSink for RecordingSink {
    fn observe_admission_controller(
        &self,
        elapsed: Duration,
        failed: bool,
        handler: &str,
        attributes: &Attributes,
        step: Step,
    ) {
        self.events
            .lock()
            .push(Observation::Controller(ControllerObservation {
                handler: handler.to_string(),
                step,
                failed,
                operation: attributes.operation(),
                request: attributes.uid().clone(),
                elapsed,
            }));
    }

    fn observe_admission_step(
        &self,
        elapsed: Duration,
        failed: bool,
        attributes: &Attributes,
        step: Step,
    ) {
        self.events.lock().push(Observation::Step(StepObservation {
            step,
            failed,
            operation: attributes.operation(),
            request: attributes.uid().clone(),
            elapsed,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use admission_core_types::GroupVersionResource;

    #[test]
    fn keeps_arrival_order() {
        let sink = RecordingSink::new();
        let attrs = Attributes::builder(
            Operation::Create,
            GroupVersionResource::new("", "v1", "pods"),
        )
        .build();
        sink.observe_admission_controller(Duration::ZERO, false, "a", &attrs, Step::Mutating);
        sink.observe_admission_step(Duration::ZERO, false, &attrs, Step::Mutating);
        sink.observe_admission_controller(Duration::ZERO, true, "b", &attrs, Step::Validating);

        let events = sink.observations();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], Observation::Step(_)));
        assert_eq!(sink.handlers_for(Step::Mutating), vec!["a".to_string()]);
        assert_eq!(sink.handlers_for(Step::Validating), vec!["b".to_string()]);

        sink.clear();
        assert!(sink.observations().is_empty());
    }
}
