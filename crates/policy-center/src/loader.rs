//! Builds an [`AdmissionPolicySnapshot`] from layered sources.
//!
//! Layers apply in this order, each on top of the previous one: builtin
//! defaults, policy files, `ADMISSION_POLICY__*` variables,
//! `ADMISSION_POLICY_OVERRIDE_JSON`, `ADMISSION_POLICY_CLI_OVERRIDES`.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::api::apply_override_to_snapshot;
use crate::defaults::default_snapshot;
use crate::errors::PolicyError;
use crate::model::{AdmissionPolicySnapshot, PolicySource};

pub const ENV_PREFIX: &str = "ADMISSION_POLICY__";
pub const ENV_JSON: &str = "ADMISSION_POLICY_OVERRIDE_JSON";
pub const ENV_CLI_OVERRIDES: &str = "ADMISSION_POLICY_CLI_OVERRIDES";

const POLICY_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub paths: Vec<PathBuf>,
    pub include_env: bool,
    pub include_cli_env: bool,
}

impl LoadOptions {
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            paths: vec![path.into()],
            include_env: true,
            include_cli_env: true,
        }
    }
}

/// Defaults, the optional file or directory at `path`, then the environment.
pub fn load_snapshot(path: Option<&Path>) -> Result<AdmissionPolicySnapshot, PolicyError> {
    let options = LoadOptions {
        paths: path.map(Path::to_path_buf).into_iter().collect(),
        include_env: true,
        include_cli_env: true,
    };
    load_snapshot_with_options(&options)
}

pub fn load_snapshot_with_options(
    options: &LoadOptions,
) -> Result<AdmissionPolicySnapshot, PolicyError> {
    let mut snapshot = default_snapshot();
    record_builtin_provenance(&mut snapshot)?;

    let mut layers = Vec::new();
    for path in options.paths.iter().filter(|path| path.exists()) {
        layers.extend(file_layers(path)?);
    }
    if options.include_env {
        layers.push(env_layer());
        if let Some(layer) = json_env_layer()? {
            layers.push(layer);
        }
    }
    if options.include_cli_env {
        layers.push(cli_layer());
    }

    for layer in layers {
        layer.apply(&mut snapshot)?;
    }
    Ok(snapshot)
}

/// Dotted policy paths and their values, all from one source.
struct Layer {
    source: PolicySource,
    entries: Vec<(String, Value)>,
}

impl Layer {
    fn new(source: PolicySource) -> Self {
        Self {
            source,
            entries: Vec::new(),
        }
    }

    fn from_document(source: PolicySource, document: Value) -> Self {
        let mut layer = Self::new(source);
        layer.flatten(String::new(), document);
        layer
    }

    /// Objects contribute one entry per leaf; arrays and scalars are leaves.
    fn flatten(&mut self, path: String, value: Value) {
        match value {
            Value::Object(fields) => {
                for (key, child) in fields {
                    let key = key.trim().to_ascii_lowercase();
                    let child_path = if path.is_empty() {
                        key
                    } else {
                        format!("{path}.{key}")
                    };
                    self.flatten(child_path, child);
                }
            }
            leaf if !path.is_empty() => self.entries.push((path, leaf)),
            _ => {}
        }
    }

    fn apply(self, snapshot: &mut AdmissionPolicySnapshot) -> Result<(), PolicyError> {
        for (path, value) in &self.entries {
            apply_override_to_snapshot(snapshot, path, value, self.source)?;
        }
        Ok(())
    }
}

/// A directory yields one layer per policy file, in file-name order.
fn file_layers(path: &Path) -> Result<Vec<Layer>, PolicyError> {
    if !path.is_dir() {
        return Ok(vec![file_layer(path)?]);
    }
    let entries = fs::read_dir(path).map_err(|err| io_error(path, err))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|file| {
            file.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| POLICY_EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();
    files.iter().map(|file| file_layer(file)).collect()
}

fn file_layer(path: &Path) -> Result<Layer, PolicyError> {
    let text = fs::read_to_string(path).map_err(|err| io_error(path, err))?;
    // YAML is a superset of JSON, so one parser covers both extensions.
    let document: serde_yaml::Value = serde_yaml::from_str(&text)
        .map_err(|err| PolicyError::Invalid(format!("{}: {err}", path.display())))?;
    let document = serde_json::to_value(document)
        .map_err(|err| PolicyError::Invalid(format!("{}: {err}", path.display())))?;
    Ok(Layer::from_document(PolicySource::File, document))
}

fn io_error(path: &Path, err: std::io::Error) -> PolicyError {
    PolicyError::Io(format!("{}: {err}", path.display()))
}

/// `ADMISSION_POLICY__OBSERVE__SERIES_LIMIT=32` sets `observe.series_limit`.
fn env_layer() -> Layer {
    let mut vars: Vec<(String, String)> = env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect();
    vars.sort();

    let mut layer = Layer::new(PolicySource::Env);
    for (key, raw) in vars {
        if let Some(path) = env_key_to_path(&key[ENV_PREFIX.len()..]) {
            layer.entries.push((path, parse_scalar(&raw)));
        }
    }
    layer
}

fn env_key_to_path(key: &str) -> Option<String> {
    let segments: Vec<String> = key
        .split("__")
        .filter(|segment| !segment.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    (!segments.is_empty()).then(|| segments.join("."))
}

fn json_env_layer() -> Result<Option<Layer>, PolicyError> {
    let Ok(raw) = env::var(ENV_JSON) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let document: Value = serde_json::from_str(&raw)
        .map_err(|err| PolicyError::Invalid(format!("{ENV_JSON}: {err}")))?;
    Ok(Some(Layer::from_document(PolicySource::Env, document)))
}

fn cli_layer() -> Layer {
    let raw = env::var(ENV_CLI_OVERRIDES).unwrap_or_default();
    let mut layer = Layer::new(PolicySource::Cli);
    layer.entries = parse_assignments(&raw);
    layer
}

/// Parses `a.b=v,c.d=w`. A path without `=` is set to null.
fn parse_assignments(raw: &str) -> Vec<(String, Value)> {
    raw.split(',')
        .filter_map(|token| {
            let (path, value) = token.split_once('=').unwrap_or((token, ""));
            let path = path.trim();
            (!path.is_empty()).then(|| (path.to_string(), parse_scalar(value.trim())))
        })
        .collect()
}

/// JSON when it parses (numbers, booleans, arrays), otherwise a plain string.
fn parse_scalar(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn record_builtin_provenance(snapshot: &mut AdmissionPolicySnapshot) -> Result<(), PolicyError> {
    let document = serde_json::json!({
        "plugins": serde_json::to_value(&snapshot.plugins)
            .map_err(|err| PolicyError::Invalid(err.to_string()))?,
        "observe": serde_json::to_value(&snapshot.observe)
            .map_err(|err| PolicyError::Invalid(err.to_string()))?,
    });
    for (path, _) in Layer::from_document(PolicySource::Builtin, document).entries {
        snapshot.set_provenance(&path, PolicySource::Builtin);
    }
    Ok(())
}
