use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use admission_kernel::{
    AdmissionError, AdmissionKernel, Attributes, GroupVersionKind, GroupVersionResource,
    Operation, PluginRegistry, UserInfo,
};
use admission_observe::policy::current_policy;
use admission_policy_center::{
    load_snapshot, InMemoryPolicyCenter, LoadOptions, PolicyCenter,
};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::args::{OutputFormat, ReviewArgs, ServeArgs};

pub fn cmd_plugins(output: OutputFormat) -> Result<()> {
    let names = PluginRegistry::builtin().registered();
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
        OutputFormat::Human => {
            for name in names {
                println!("{name}");
            }
        }
    }
    Ok(())
}

pub fn cmd_policy(config: Option<&Path>, output: OutputFormat) -> Result<()> {
    let snapshot = load_snapshot(config).context("loading admission policy")?;
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&snapshot)?),
        OutputFormat::Human => {
            println!("Policy Revision: {}", snapshot.rev);
            println!("Chain → {}", snapshot.plugins.enabled().join(", "));
            if !snapshot.plugins.disabled.is_empty() {
                println!("Disabled → {}", snapshot.plugins.disabled.join(", "));
            }
            println!(
                "Observe → metrics={}, tracing={}, slow_threshold_ms={}, series_limit={}",
                snapshot.observe.enable_metrics,
                snapshot.observe.enable_tracing,
                snapshot.observe.slow_threshold_ms,
                snapshot.observe.series_limit
            );
        }
    }
    Ok(())
}

/// Request file accepted by `review`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRequest {
    pub operation: Operation,
    pub resource: GroupVersionResource,
    #[serde(default)]
    pub kind: GroupVersionKind,
    #[serde(default)]
    pub subresource: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub object: Option<Value>,
    #[serde(default)]
    pub old_object: Option<Value>,
    #[serde(default)]
    pub user: UserInfo,
    #[serde(default)]
    pub dry_run: bool,
}

impl ReviewRequest {
    pub fn into_attributes(self) -> Attributes {
        let mut builder = Attributes::builder(self.operation, self.resource)
            .kind(self.kind)
            .subresource(self.subresource)
            .namespace(self.namespace)
            .name(self.name)
            .user(self.user)
            .dry_run(self.dry_run);
        if let Some(object) = self.object {
            builder = builder.object(object);
        }
        if let Some(old_object) = self.old_object {
            builder = builder.old_object(old_object);
        }
        builder.build()
    }
}

pub fn cmd_review(config: Option<&Path>, args: ReviewArgs, output: OutputFormat) -> Result<()> {
    let kernel = AdmissionKernel::bootstrap(config)?;
    let raw = std::fs::read_to_string(&args.request)
        .with_context(|| format!("reading {}", args.request.display()))?;
    let request: ReviewRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", args.request.display()))?;

    let mut attributes = request.into_attributes();
    let outcome = kernel.review(&mut attributes);
    let uid = attributes.uid().0.clone();
    let patched = attributes.into_object();

    match (&outcome, output) {
        (Ok(()), OutputFormat::Json) => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "uid": uid,
                "allowed": true,
                "object": patched,
            }))?
        ),
        (Ok(()), OutputFormat::Human) => {
            println!("allowed");
            if let Some(object) = patched {
                println!("{}", serde_json::to_string_pretty(&object)?);
            }
        }
        (Err(err), OutputFormat::Json) => println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "uid": uid,
                "allowed": false,
                "reason": err.to_string(),
                "causes": err
                    .causes()
                    .iter()
                    .map(|cause| json!({"field": cause.field, "message": cause.message}))
                    .collect::<Vec<_>>(),
            }))?
        ),
        (Err(err), OutputFormat::Human) => println!("denied: {err}"),
    }

    match outcome {
        Ok(()) => Ok(()),
        Err(AdmissionError::Denied { .. }) => bail!("request denied"),
        Err(err) => Err(err.into()),
    }
}

pub async fn cmd_serve(config: Option<&Path>, args: ServeArgs) -> Result<()> {
    let kernel = Arc::new(AdmissionKernel::bootstrap_with(config, args.metrics_bind)?);
    let exporter = current_policy();
    let options = match config {
        Some(path) => LoadOptions::with_path(path),
        None => LoadOptions {
            include_env: true,
            include_cli_env: true,
            ..LoadOptions::default()
        },
    };
    let center = Arc::new(InMemoryPolicyCenter::from_options(options)?);
    let watcher = {
        let kernel = Arc::clone(&kernel);
        let center = Arc::clone(&center);
        tokio::spawn(async move { kernel.watch(center.as_ref()).await })
    };

    let reloader = (args.reload_secs > 0).then(|| {
        let center = Arc::clone(&center);
        let period = Duration::from_secs(args.reload_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(err) = center.reload().await {
                    warn!(%err, "admission policy reload failed");
                }
            }
        })
    });

    info!(
        plugins = ?kernel.chain().names(),
        metrics = exporter.prom_enable,
        metrics_bind = %exporter.prom_bind,
        "admission kernel serving"
    );
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("admission kernel shutting down");

    watcher.abort();
    if let Some(reloader) = reloader {
        reloader.abort();
    }
    Ok(())
}
