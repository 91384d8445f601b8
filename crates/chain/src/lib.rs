//! Admission chain executor.
//!
//! A [`Chain`] runs its handlers in two separately invoked phases: `mutate`
//! (handlers may rewrite the proposed object) followed by `validate`
//! (handlers may only accept or reject). Each handler invocation and each
//! phase is reported to a [`admission_observe::MetricsSink`].

pub mod chain;
pub mod handler;

pub use admission_observe::Step;
pub use chain::Chain;
pub use handler::{Handler, MutatingHandler, NamedHandler, OperationSet, ValidatingHandler};
