use thiserror::Error;

use crate::Attributes;

#[cfg_attr(feature = "serde-full", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StatusCause {
    pub field: String,
    pub message: String,
}

impl StatusCause {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Error returned by an admission handler.
///
/// The chain returns whatever a handler produced without inspecting it;
/// callers classify with [`AdmissionError::is_denied`] and friends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("{reason}")]
    Denied {
        reason: String,
        causes: Vec<StatusCause>,
    },
    #[error("admission handler failed: {message}")]
    Internal { message: String },
}

impl AdmissionError {
    pub fn denied(reason: impl Into<String>) -> Self {
        Self::Denied {
            reason: reason.into(),
            causes: Vec::new(),
        }
    }

    /// Denial naming the resource and object under review, e.g.
    /// `pods "web-0" is forbidden: quota exceeded`.
    pub fn forbidden(attributes: &Attributes, reason: impl AsRef<str>) -> Self {
        let resource = attributes.resource().group_resource();
        let reason = reason.as_ref();
        let message = if attributes.name().is_empty() {
            format!("{resource} is forbidden: {reason}")
        } else {
            format!("{resource} \"{}\" is forbidden: {reason}", attributes.name())
        };
        Self::denied(message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn with_cause(mut self, cause: StatusCause) -> Self {
        if let Self::Denied { causes, .. } = &mut self {
            causes.push(cause);
        }
        self
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Denied { .. })
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    pub fn causes(&self) -> &[StatusCause] {
        match self {
            Self::Denied { causes, .. } => causes,
            Self::Internal { .. } => &[],
        }
    }
}
