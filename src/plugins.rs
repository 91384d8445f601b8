//! Named handler factories and the builtin reference plugins.

use std::collections::HashMap;
use std::sync::Arc;

use admission_chain::{Handler, MutatingHandler, NamedHandler, ValidatingHandler};
use admission_core_types::{AdmissionError, Attributes, Operation};
use admission_policy_center::{normalize_plugin_name, PluginPolicy};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::errors::{KernelError, KernelResult};

pub const ALWAYS_ADMIT: &str = "always-admit";
pub const ALWAYS_DENY: &str = "always-deny";

const DENY_ALL_MESSAGE: &str = "admission control is denying all modifications";

/// Builds a handler from the plugin's settings (`Value::Null` when unset).
pub type PluginFactory = Arc<dyn Fn(&Value) -> KernelResult<Arc<dyn Handler>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    inner: Arc<RwLock<HashMap<String, PluginFactory>>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `always-admit` and `always-deny`.
    pub fn builtin() -> Self {
        let registry = Self::new();
        registry.insert(ALWAYS_ADMIT, |_| Ok(Arc::new(AlwaysAdmit)));
        registry.insert(ALWAYS_DENY, |settings| {
            Ok(Arc::new(AlwaysDeny::from_settings(settings)?))
        });
        registry
    }

    pub fn register<F>(&self, name: &str, factory: F) -> KernelResult<()>
    where
        F: Fn(&Value) -> KernelResult<Arc<dyn Handler>> + Send + Sync + 'static,
    {
        let name = normalize_plugin_name(name);
        let mut guard = self.inner.write();
        if guard.contains_key(&name) {
            return Err(KernelError::DuplicatePlugin(name));
        }
        guard.insert(name, Arc::new(factory));
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.inner.read().contains_key(&normalize_plugin_name(name))
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiates the enabled plugins in configured order.
    pub fn new_from_plugins(&self, policy: &PluginPolicy) -> KernelResult<Vec<NamedHandler>> {
        let mut handlers = Vec::new();
        for name in policy.enabled() {
            let factory = self
                .inner
                .read()
                .get(&name)
                .cloned()
                .ok_or_else(|| KernelError::UnknownPlugin(name.clone()))?;
            let handler = factory(&policy.settings_for(&name))?;
            debug!(plugin = %name, "admission plugin initialized");
            handlers.push(NamedHandler::from_arc(name, handler));
        }
        Ok(handlers)
    }

    fn insert<F>(&self, name: &str, factory: F)
    where
        F: Fn(&Value) -> KernelResult<Arc<dyn Handler>> + Send + Sync + 'static,
    {
        self.inner
            .write()
            .insert(normalize_plugin_name(name), Arc::new(factory));
    }
}

/// Admits everything in both phases.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAdmit;

impl Handler for AlwaysAdmit {
    fn handles(&self, _operation: Operation) -> bool {
        true
    }

    fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
        Some(self)
    }

    fn as_validating(&self) -> Option<&dyn ValidatingHandler> {
        Some(self)
    }
}

impl MutatingHandler for AlwaysAdmit {
    fn admit(&self, _attributes: &mut Attributes) -> Result<(), AdmissionError> {
        Ok(())
    }
}

impl ValidatingHandler for AlwaysAdmit {
    fn validate(&self, _attributes: &Attributes) -> Result<(), AdmissionError> {
        Ok(())
    }
}

/// Rejects everything in both phases with a forbidden error.
#[derive(Debug, Clone)]
pub struct AlwaysDeny {
    message: String,
}

impl Default for AlwaysDeny {
    fn default() -> Self {
        Self {
            message: DENY_ALL_MESSAGE.to_string(),
        }
    }
}

impl AlwaysDeny {
    /// Accepts `null` or `{ "message": "<reason>" }`.
    pub fn from_settings(settings: &Value) -> KernelResult<Self> {
        let message = match settings {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map.get("message"),
            other => {
                return Err(KernelError::PluginInit {
                    name: ALWAYS_DENY.into(),
                    message: format!("expected settings object, got {other}"),
                })
            }
        };
        match message {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::String(message)) if !message.trim().is_empty() => Ok(Self {
                message: message.clone(),
            }),
            Some(other) => Err(KernelError::PluginInit {
                name: ALWAYS_DENY.into(),
                message: format!("message must be a non-empty string, got {other}"),
            }),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Handler for AlwaysDeny {
    fn handles(&self, _operation: Operation) -> bool {
        true
    }

    fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
        Some(self)
    }

    fn as_validating(&self) -> Option<&dyn ValidatingHandler> {
        Some(self)
    }
}

impl MutatingHandler for AlwaysDeny {
    fn admit(&self, attributes: &mut Attributes) -> Result<(), AdmissionError> {
        Err(AdmissionError::forbidden(attributes, &self.message))
    }
}

impl ValidatingHandler for AlwaysDeny {
    fn validate(&self, attributes: &Attributes) -> Result<(), AdmissionError> {
        Err(AdmissionError::forbidden(attributes, &self.message))
    }
}
