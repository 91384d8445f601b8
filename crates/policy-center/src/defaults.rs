use crate::model::{AdmissionPolicySnapshot, ObservePolicy, PluginPolicy};

pub const DEFAULT_PLUGIN_ORDER: &[&str] = &["always-admit"];

pub fn default_snapshot() -> AdmissionPolicySnapshot {
    AdmissionPolicySnapshot {
        rev: 1,
        plugins: PluginPolicy {
            order: DEFAULT_PLUGIN_ORDER.iter().map(|name| name.to_string()).collect(),
            disabled: Vec::new(),
            settings: Default::default(),
        },
        observe: ObservePolicy {
            enable_metrics: true,
            enable_tracing: true,
            slow_threshold_ms: 500,
            series_limit: 256,
            prom_enable: false,
            prom_bind: "127.0.0.1:9090".into(),
        },
        provenance: Default::default(),
    }
}
