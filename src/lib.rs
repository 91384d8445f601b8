//! Admission kernel: builds the admission handler chain from policy, runs
//! reviews against it, and swaps in a rebuilt chain when policy changes.

pub mod errors;
pub mod kernel;
pub mod plugins;

pub use admission_chain::{
    Chain, Handler, MutatingHandler, NamedHandler, OperationSet, Step, ValidatingHandler,
};
pub use admission_core_types::{
    AdmissionError, Attributes, GroupVersionKind, GroupVersionResource, Operation, RequestId,
    StatusCause, UserInfo,
};
pub use errors::{KernelError, KernelResult};
pub use kernel::{apply_observe_policy, AdmissionKernel};
pub use plugins::{AlwaysAdmit, AlwaysDeny, PluginFactory, PluginRegistry};
