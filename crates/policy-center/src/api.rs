use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::errors::PolicyError;
use crate::loader::{load_snapshot_with_options, LoadOptions};
use crate::model::{
    normalize_plugin_name, AdmissionPolicySnapshot, PolicySource, RuntimeOverrideSpec,
};
use crate::override_store::RuntimeOverrideStore;

#[async_trait]
pub trait PolicyCenter: Send + Sync {
    async fn snapshot(&self) -> Arc<AdmissionPolicySnapshot>;
    async fn reload(&self) -> Result<(), PolicyError>;
    async fn apply_override(&self, override_spec: RuntimeOverrideSpec) -> Result<(), PolicyError>;
    fn subscribe(&self) -> watch::Receiver<Arc<AdmissionPolicySnapshot>>;
    async fn guard(&self) -> PolicyGuard;
}

struct PolicyState {
    base: AdmissionPolicySnapshot,
    snapshot: AdmissionPolicySnapshot,
    overrides: RuntimeOverrideStore,
    rev_counter: u64,
}

impl PolicyState {
    fn new(base: AdmissionPolicySnapshot) -> Self {
        let rev_counter = base.rev;
        Self {
            base: base.clone(),
            snapshot: base,
            overrides: RuntimeOverrideStore::default(),
            rev_counter,
        }
    }

    fn apply_active_overrides(&mut self) -> Result<(), PolicyError> {
        let mut new_snapshot = self.base.clone();
        for (path, value) in self.overrides.active_entries() {
            apply_override_to_snapshot(
                &mut new_snapshot,
                &path,
                &value,
                PolicySource::RuntimeOverride,
            )?;
        }
        self.rev_counter = self.rev_counter.saturating_add(1);
        new_snapshot.rev = self.rev_counter;
        self.snapshot = new_snapshot;
        Ok(())
    }
}

pub struct InMemoryPolicyCenter {
    state: Arc<Mutex<PolicyState>>,
    watch_tx: watch::Sender<Arc<AdmissionPolicySnapshot>>,
    source: Option<LoadOptions>,
}

impl InMemoryPolicyCenter {
    pub fn new(snapshot: AdmissionPolicySnapshot) -> Self {
        let state = PolicyState::new(snapshot);
        let current_snapshot = Arc::new(state.snapshot.clone());
        let (watch_tx, _watch_rx) = watch::channel(current_snapshot);
        Self {
            state: Arc::new(Mutex::new(state)),
            watch_tx,
            source: None,
        }
    }

    /// Center backed by configuration files and the environment; `reload`
    /// re-reads them and re-applies live overrides on top.
    pub fn from_options(options: LoadOptions) -> Result<Self, PolicyError> {
        let snapshot = load_snapshot_with_options(&options)?;
        let mut center = Self::new(snapshot);
        center.source = Some(options);
        Ok(center)
    }
}

#[async_trait]
impl PolicyCenter for InMemoryPolicyCenter {
    async fn snapshot(&self) -> Arc<AdmissionPolicySnapshot> {
        let guard = self.state.lock().await;
        Arc::new(guard.snapshot.clone())
    }

    async fn reload(&self) -> Result<(), PolicyError> {
        let Some(options) = &self.source else {
            return Err(PolicyError::NotImplemented(
                "reload without a configuration source".into(),
            ));
        };
        let base = load_snapshot_with_options(options)?;
        let mut guard = self.state.lock().await;
        guard.base = base;
        guard.apply_active_overrides()?;
        let snapshot = Arc::new(guard.snapshot.clone());
        drop(guard);

        info!(rev = snapshot.rev, "admission policy reloaded");
        let _ = self.watch_tx.send(snapshot);
        Ok(())
    }

    async fn apply_override(&self, override_spec: RuntimeOverrideSpec) -> Result<(), PolicyError> {
        let ttl = if override_spec.ttl_seconds > 0 {
            Some(Duration::from_secs(override_spec.ttl_seconds))
        } else {
            None
        };
        let mut guard = self.state.lock().await;
        guard.overrides.insert(
            override_spec.path.clone(),
            override_spec.value.clone(),
            override_spec.owner.clone(),
            ttl,
        );
        if let Err(err) = guard.apply_active_overrides() {
            guard.overrides.remove(&override_spec.path);
            return Err(err);
        }
        let snapshot = Arc::new(guard.snapshot.clone());
        drop(guard);

        info!(
            path = %override_spec.path,
            owner = %override_spec.owner,
            reason = %override_spec.reason,
            rev = snapshot.rev,
            "admission policy override applied"
        );
        let _ = self.watch_tx.send(snapshot);

        if let Some(ttl) = ttl {
            let state = Arc::clone(&self.state);
            let watch_tx = self.watch_tx.clone();
            let path = override_spec.path.clone();
            tokio::spawn(async move {
                sleep(ttl).await;
                let mut guard = state.lock().await;
                if guard.overrides.remove(&path) {
                    match guard.apply_active_overrides() {
                        Ok(()) => {
                            let snapshot = Arc::new(guard.snapshot.clone());
                            drop(guard);
                            if watch_tx.send(snapshot).is_err() {
                                warn!("policy override expiry broadcast had no listeners");
                            }
                        }
                        Err(err) => {
                            warn!("policy override expiry recompute failed: {err}");
                        }
                    }
                }
            });
        }

        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Arc<AdmissionPolicySnapshot>> {
        self.watch_tx.subscribe()
    }

    async fn guard(&self) -> PolicyGuard {
        let snapshot = self.snapshot().await;
        PolicyGuard { snapshot }
    }
}

/// Sticky view of one policy revision.
#[derive(Clone, Debug)]
pub struct PolicyGuard {
    snapshot: Arc<AdmissionPolicySnapshot>,
}

impl PolicyGuard {
    pub fn revision(&self) -> u64 {
        self.snapshot.rev
    }

    pub fn snapshot(&self) -> Arc<AdmissionPolicySnapshot> {
        Arc::clone(&self.snapshot)
    }
}

const SETTINGS_PREFIX: &str = "plugins.settings.";

pub(crate) fn apply_override_to_snapshot(
    snapshot: &mut AdmissionPolicySnapshot,
    path: &str,
    value: &Value,
    source: PolicySource,
) -> Result<(), PolicyError> {
    let changed = match path {
        "plugins.order" => merge_list(&mut snapshot.plugins.order, to_string_list(value)?),
        "plugins.disabled" => merge_list(&mut snapshot.plugins.disabled, to_string_list(value)?),
        "observe.enable_metrics" => {
            merge_bool(&mut snapshot.observe.enable_metrics, to_bool(value)?)
        }
        "observe.enable_tracing" => {
            merge_bool(&mut snapshot.observe.enable_tracing, to_bool(value)?)
        }
        "observe.prom_enable" => merge_bool(&mut snapshot.observe.prom_enable, to_bool(value)?),
        "observe.prom_bind" => merge_string(&mut snapshot.observe.prom_bind, to_string(value)?),
        "observe.slow_threshold_ms" => merge_u64(
            &mut snapshot.observe.slow_threshold_ms,
            to_u64(value)?,
            source,
        ),
        "observe.series_limit" => merge_usize(
            &mut snapshot.observe.series_limit,
            to_usize(value)?,
            source,
        ),
        path if path.starts_with(SETTINGS_PREFIX) => {
            merge_setting(snapshot, &path[SETTINGS_PREFIX.len()..], value)?
        }
        path => return Err(PolicyError::UnsupportedPath(path.to_string())),
    };
    if changed {
        snapshot.set_provenance(path, source);
    }
    Ok(())
}

/// Writes `value` at `plugin.key.subkey` inside the plugin settings map.
fn merge_setting(
    snapshot: &mut AdmissionPolicySnapshot,
    rest: &str,
    value: &Value,
) -> Result<bool, PolicyError> {
    let mut segments = rest.split('.').filter(|segment| !segment.is_empty());
    let plugin = segments
        .next()
        .map(normalize_plugin_name)
        .ok_or_else(|| PolicyError::UnsupportedPath(format!("{SETTINGS_PREFIX}{rest}")))?;
    let keys: Vec<&str> = segments.collect();

    let entry = snapshot
        .plugins
        .settings
        .entry(plugin)
        .or_insert(Value::Null);
    let mut target = entry;
    for key in keys {
        if !target.is_object() {
            *target = Value::Object(Default::default());
        }
        target = &mut target[key];
    }
    let original = target.clone();
    *target = value.clone();
    Ok(*target != original)
}

fn merge_list(target: &mut Vec<String>, candidate: Vec<String>) -> bool {
    let changed = *target != candidate;
    *target = candidate;
    changed
}

fn merge_string(target: &mut String, candidate: String) -> bool {
    let changed = *target != candidate;
    *target = candidate;
    changed
}

fn merge_usize(target: &mut usize, candidate: usize, source: PolicySource) -> bool {
    let original = *target;
    if matches!(source, PolicySource::RuntimeOverride | PolicySource::Cli) {
        *target = candidate;
    } else {
        *target = (*target).min(candidate);
    }
    *target != original
}

fn merge_u64(target: &mut u64, candidate: u64, source: PolicySource) -> bool {
    let original = *target;
    if matches!(source, PolicySource::RuntimeOverride | PolicySource::Cli) {
        *target = candidate;
    } else {
        *target = (*target).min(candidate);
    }
    *target != original
}

fn merge_bool(target: &mut bool, candidate: bool) -> bool {
    let original = *target;
    *target = candidate;
    *target != original
}

/// Accepts a JSON array of strings or a `,`/`;` separated string.
fn to_string_list(value: &Value) -> Result<Vec<String>, PolicyError> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(normalize_plugin_name)
                    .ok_or_else(|| {
                        PolicyError::InvalidValue(format!("expected string, got {item}"))
                    })
            })
            .collect(),
        Value::String(raw) => Ok(raw
            .split([',', ';'])
            .map(normalize_plugin_name)
            .filter(|s| !s.is_empty())
            .collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(PolicyError::InvalidValue(format!(
            "expected list of plugin names, got {other}"
        ))),
    }
}

fn to_string(value: &Value) -> Result<String, PolicyError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected string, got {value}")))
}

fn to_usize(value: &Value) -> Result<usize, PolicyError> {
    to_u64(value).map(|v| v as usize)
}

fn to_u64(value: &Value) -> Result<u64, PolicyError> {
    value
        .as_u64()
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected unsigned integer, got {value}")))
}

fn to_bool(value: &Value) -> Result<bool, PolicyError> {
    value
        .as_bool()
        .ok_or_else(|| PolicyError::InvalidValue(format!("expected bool, got {value}")))
}
