use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct AdmissionPolicySnapshot {
    pub rev: u64,
    pub plugins: PluginPolicy,
    pub observe: ObservePolicy,
    pub provenance: HashMap<String, PolicyProvenance>,
}

/// Canonical plugin name: trimmed, lower-case, `_` spelled as `-` so that
/// environment variable paths can name plugins.
pub fn normalize_plugin_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('_', "-")
}

/// Which admission plugins run, in which order, with which settings.
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct PluginPolicy {
    pub order: Vec<String>,
    pub disabled: Vec<String>,
    pub settings: BTreeMap<String, Value>,
}

impl PluginPolicy {
    /// Configured order minus disabled plugins, names normalized;
    /// duplicates keep their first position.
    pub fn enabled(&self) -> Vec<String> {
        let disabled: Vec<String> = self
            .disabled
            .iter()
            .map(|name| normalize_plugin_name(name))
            .collect();
        let mut seen = Vec::new();
        for name in &self.order {
            let name = normalize_plugin_name(name);
            if name.is_empty() || seen.contains(&name) || disabled.contains(&name) {
                continue;
            }
            seen.push(name);
        }
        seen
    }

    pub fn settings_for(&self, name: &str) -> Value {
        self.settings
            .get(&normalize_plugin_name(name))
            .cloned()
            .unwrap_or(Value::Null)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct ObservePolicy {
    pub enable_metrics: bool,
    pub enable_tracing: bool,
    pub slow_threshold_ms: u64,
    pub series_limit: usize,
    pub prom_enable: bool,
    pub prom_bind: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyProvenance {
    pub path: String,
    pub source: PolicySource,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum PolicySource {
    Builtin,
    File,
    Env,
    Cli,
    RuntimeOverride,
}

impl AdmissionPolicySnapshot {
    pub fn set_provenance(&mut self, path: &str, source: PolicySource) {
        self.provenance.insert(
            path.to_string(),
            PolicyProvenance {
                path: path.to_string(),
                source,
            },
        );
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuntimeOverrideSpec {
    pub path: String,
    pub value: Value,
    pub owner: String,
    pub reason: String,
    pub ttl_seconds: u64,
}
