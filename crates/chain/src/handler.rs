//! Handler capability contracts.
//!
//! Every handler answers [`Handler::handles`]. Participation in a phase is
//! advertised through [`Handler::as_mutating`] and [`Handler::as_validating`],
//! so the chain can discover a handler's capability set without calling it.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use admission_core_types::{AdmissionError, Attributes, Operation};

pub trait Handler: Send + Sync {
    /// Whether this handler wants to see requests with `operation`.
    fn handles(&self, operation: Operation) -> bool;

    fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
        None
    }

    fn as_validating(&self) -> Option<&dyn ValidatingHandler> {
        None
    }
}

/// Handler that may rewrite the proposed object.
pub trait MutatingHandler: Handler {
    fn admit(&self, attributes: &mut Attributes) -> Result<(), AdmissionError>;
}

/// Handler that may only accept or reject.
pub trait ValidatingHandler: Handler {
    fn validate(&self, attributes: &Attributes) -> Result<(), AdmissionError>;
}

/// Operations a handler responds to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OperationSet {
    operations: BTreeSet<Operation>,
}

impl OperationSet {
    pub fn new<I>(operations: I) -> Self
    where
        I: IntoIterator<Item = Operation>,
    {
        Self {
            operations: operations.into_iter().collect(),
        }
    }

    pub fn all() -> Self {
        Self::new(Operation::ALL)
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.operations.contains(&operation)
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        self.operations.iter().copied()
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<T: IntoIterator<Item = Operation>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// A handler together with the name it reports under.
#[derive(Clone)]
pub struct NamedHandler {
    name: String,
    handler: Arc<dyn Handler>,
}

impl NamedHandler {
    pub fn new<H>(name: impl Into<String>, handler: H) -> Self
    where
        H: Handler + 'static,
    {
        Self::from_arc(name, Arc::new(handler))
    }

    pub fn from_arc(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    pub fn can_mutate(&self) -> bool {
        self.handler.as_mutating().is_some()
    }

    pub fn can_validate(&self) -> bool {
        self.handler.as_validating().is_some()
    }
}

impl fmt::Debug for NamedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedHandler")
            .field("name", &self.name)
            .field("mutating", &self.can_mutate())
            .field("validating", &self.can_validate())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert(OperationSet);

    impl Handler for Inert {
        fn handles(&self, operation: Operation) -> bool {
            self.0.contains(operation)
        }
    }

    struct Defaulter;

    impl Handler for Defaulter {
        fn handles(&self, _operation: Operation) -> bool {
            true
        }

        fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
            Some(self)
        }
    }

    impl MutatingHandler for Defaulter {
        fn admit(&self, _attributes: &mut Attributes) -> Result<(), AdmissionError> {
            Ok(())
        }
    }

    #[test]
    fn operation_set_membership() {
        let set = OperationSet::new([Operation::Update, Operation::Delete]);
        assert!(set.contains(Operation::Update));
        assert!(!set.contains(Operation::Create));
        assert_eq!(set.iter().count(), 2);
        assert_eq!(OperationSet::all().iter().count(), 4);
        assert!(OperationSet::default().is_empty());
    }

    #[test]
    fn capability_is_discovered_without_invocation() {
        let inert = NamedHandler::new("inert", Inert(OperationSet::all()));
        assert!(!inert.can_mutate());
        assert!(!inert.can_validate());
        assert!(inert.handler().handles(Operation::Connect));

        let defaulter = NamedHandler::new("defaulter", Defaulter);
        assert!(defaulter.can_mutate());
        assert!(!defaulter.can_validate());
        assert_eq!(defaulter.name(), "defaulter");
    }
}
