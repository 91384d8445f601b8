use std::sync::Arc;
use std::thread;
use std::time::Duration;

use admission_kernel::{
    AdmissionError, AdmissionKernel, Attributes, GroupVersionResource, Handler, KernelError,
    MutatingHandler, Operation, PluginRegistry, Step, ValidatingHandler,
};
use admission_observe::policy::{current_policy, set_policy};
use admission_observe::{ObsPolicyView, RecordingSink};
use admission_policy_center::{
    default_snapshot, AdmissionPolicySnapshot, InMemoryPolicyCenter, PolicyCenter,
    RuntimeOverrideSpec,
};
use serde_json::json;
use serial_test::serial;

/// Mutates `stamped` onto the object and refuses objects without it.
struct Stamp;

impl Handler for Stamp {
    fn handles(&self, operation: Operation) -> bool {
        matches!(operation, Operation::Create | Operation::Update)
    }

    fn as_mutating(&self) -> Option<&dyn MutatingHandler> {
        Some(self)
    }

    fn as_validating(&self) -> Option<&dyn ValidatingHandler> {
        Some(self)
    }
}

impl MutatingHandler for Stamp {
    fn admit(&self, attributes: &mut Attributes) -> Result<(), AdmissionError> {
        if let Some(object) = attributes.object_mut() {
            object["stamped"] = json!(true);
        }
        Ok(())
    }
}

impl ValidatingHandler for Stamp {
    fn validate(&self, attributes: &Attributes) -> Result<(), AdmissionError> {
        match attributes.object() {
            Some(object) if object["stamped"] == json!(true) => Ok(()),
            _ => Err(AdmissionError::forbidden(attributes, "missing stamp")),
        }
    }
}

fn registry_with_stamp() -> PluginRegistry {
    let registry = PluginRegistry::builtin();
    registry
        .register("stamp", |_| Ok(Arc::new(Stamp)))
        .expect("register stamp");
    registry
}

fn snapshot_with(rev: u64, order: &[&str]) -> AdmissionPolicySnapshot {
    let mut snapshot = default_snapshot();
    snapshot.rev = rev;
    snapshot.plugins.order = order.iter().map(|name| name.to_string()).collect();
    snapshot
}

fn create_config_map(name: &str) -> Attributes {
    Attributes::builder(Operation::Create, GroupVersionResource::new("", "v1", "configmaps"))
        .namespace("kube-system")
        .name(name)
        .object(json!({"metadata": {"name": name}}))
        .build()
}

#[test]
fn default_policy_admits_and_reports_both_phases() {
    let sink = Arc::new(RecordingSink::new());
    let kernel = AdmissionKernel::with_sink(
        PluginRegistry::builtin(),
        &default_snapshot(),
        sink.clone(),
    )
    .unwrap();

    let mut attrs = create_config_map("settings");
    kernel.review(&mut attrs).unwrap();

    assert_eq!(sink.handlers_for(Step::Mutating), vec!["always-admit"]);
    assert_eq!(sink.handlers_for(Step::Validating), vec!["always-admit"]);
    let steps: Vec<(Step, bool)> = sink
        .step_observations()
        .into_iter()
        .map(|obs| (obs.step, obs.failed))
        .collect();
    assert_eq!(steps, vec![(Step::Mutating, false), (Step::Validating, false)]);
}

#[test]
fn denial_in_mutation_skips_validation() {
    let sink = Arc::new(RecordingSink::new());
    let kernel = AdmissionKernel::with_sink(
        registry_with_stamp(),
        &snapshot_with(2, &["stamp", "always-deny"]),
        sink.clone(),
    )
    .unwrap();

    let mut attrs = create_config_map("settings");
    let err = kernel.review(&mut attrs).unwrap_err();
    assert!(err.is_denied());
    assert_eq!(
        err.to_string(),
        "configmaps \"settings\" is forbidden: admission control is denying all modifications"
    );
    // stamp ran before the denial and its change stays on the object
    assert_eq!(attrs.object().unwrap()["stamped"], json!(true));
    assert!(sink.handlers_for(Step::Validating).is_empty());
    let steps = sink.step_observations();
    assert_eq!(steps.len(), 1);
    assert!(steps[0].failed);
}

#[test]
fn validators_see_mutations_from_the_same_review() {
    let sink = Arc::new(RecordingSink::new());
    let kernel = AdmissionKernel::with_sink(
        registry_with_stamp(),
        &snapshot_with(2, &["always-admit", "stamp"]),
        sink.clone(),
    )
    .unwrap();

    let mut attrs = create_config_map("settings");
    kernel.review(&mut attrs).unwrap();
    assert_eq!(
        sink.handlers_for(Step::Validating),
        vec!["always-admit", "stamp"]
    );
    assert_eq!(attrs.into_object().unwrap()["stamped"], json!(true));
}

#[test]
fn operations_outside_a_handler_set_bypass_it() {
    let kernel = AdmissionKernel::with_sink(
        registry_with_stamp(),
        &snapshot_with(2, &["stamp"]),
        Arc::new(RecordingSink::new()),
    )
    .unwrap();
    assert!(kernel.handles(Operation::Update));
    assert!(!kernel.handles(Operation::Delete));

    let mut attrs = Attributes::builder(
        Operation::Delete,
        GroupVersionResource::new("", "v1", "configmaps"),
    )
    .name("settings")
    .build();
    kernel.review(&mut attrs).unwrap();
}

#[test]
fn unknown_plugins_fail_kernel_construction() {
    let result = AdmissionKernel::with_sink(
        PluginRegistry::builtin(),
        &snapshot_with(2, &["always-admit", "pod-security"]),
        Arc::new(RecordingSink::new()),
    );
    assert!(matches!(result, Err(KernelError::UnknownPlugin(name)) if name == "pod-security"));
}

#[test]
fn reviews_never_straddle_a_reconfiguration() {
    let sink = Arc::new(RecordingSink::new());
    let kernel = AdmissionKernel::with_sink(
        registry_with_stamp(),
        &snapshot_with(1, &["always-admit"]),
        sink,
    )
    .unwrap();
    let plain = snapshot_with(2, &["always-admit"]);
    let stamped = snapshot_with(3, &["always-admit", "stamp"]);

    thread::scope(|scope| {
        scope.spawn(|| {
            for round in 0..200 {
                let next = if round % 2 == 0 { &stamped } else { &plain };
                kernel.reconfigure(next).unwrap();
            }
        });
        for worker in 0..4 {
            let kernel = &kernel;
            scope.spawn(move || {
                for i in 0..200 {
                    let mut attrs = create_config_map(&format!("cm-{worker}-{i}"));
                    kernel.review(&mut attrs).unwrap();
                }
            });
        }
    });
}

#[test]
#[serial]
fn bootstrap_builds_chain_from_policy_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("admission.yaml");
    std::fs::write(
        &path,
        r#"plugins:
  order: [always-deny]
  settings:
    always-deny:
      message: "cluster is read-only"
"#,
    )
    .unwrap();

    let kernel = AdmissionKernel::bootstrap(Some(&path)).unwrap();
    assert_eq!(kernel.chain().names(), vec!["always-deny"]);

    let mut attrs = create_config_map("settings");
    let err = kernel.review(&mut attrs).unwrap_err();
    assert_eq!(
        err.to_string(),
        "configmaps \"settings\" is forbidden: cluster is read-only"
    );
}

async fn wait_for_chain(kernel: &AdmissionKernel, expected: &[&str]) {
    for _ in 0..200 {
        if kernel.chain().names() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "chain never became {expected:?}, still {:?}",
        kernel.chain().names()
    );
}

fn override_spec(path: &str, value: serde_json::Value) -> RuntimeOverrideSpec {
    RuntimeOverrideSpec {
        path: path.into(),
        value,
        owner: "kernel-test".into(),
        reason: "exercise watcher".into(),
        ttl_seconds: 0,
    }
}

#[tokio::test]
#[serial]
async fn watch_follows_policy_center() {
    let center = Arc::new(InMemoryPolicyCenter::new(default_snapshot()));
    let kernel = Arc::new(
        AdmissionKernel::with_sink(
            PluginRegistry::builtin(),
            &default_snapshot(),
            Arc::new(RecordingSink::new()),
        )
        .unwrap(),
    );
    let watcher = {
        let kernel = Arc::clone(&kernel);
        let center = Arc::clone(&center);
        tokio::spawn(async move { kernel.watch(center.as_ref()).await })
    };

    center
        .apply_override(override_spec("plugins.order", json!(["always-deny"])))
        .await
        .unwrap();
    wait_for_chain(&kernel, &["always-deny"]).await;
    let mut attrs = create_config_map("settings");
    assert!(kernel.review(&mut attrs).unwrap_err().is_denied());

    // a snapshot naming an unregistered plugin is skipped
    center
        .apply_override(override_spec(
            "plugins.order",
            json!(["always-admit", "event-rate-limit"]),
        ))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(kernel.chain().names(), vec!["always-deny"]);

    center
        .apply_override(override_spec("plugins.disabled", json!(["event-rate-limit"])))
        .await
        .unwrap();
    wait_for_chain(&kernel, &["always-admit"]).await;
    let mut attrs = create_config_map("settings");
    kernel.review(&mut attrs).unwrap();

    watcher.abort();
}

#[tokio::test]
#[serial]
async fn watch_applies_the_centers_current_snapshot_first() {
    // same revision, different content: the center's view wins
    let mut frozen = default_snapshot();
    frozen.plugins.order = vec!["always-deny".into()];
    let center = Arc::new(InMemoryPolicyCenter::new(frozen));
    let kernel = Arc::new(
        AdmissionKernel::with_sink(
            PluginRegistry::builtin(),
            &default_snapshot(),
            Arc::new(RecordingSink::new()),
        )
        .unwrap(),
    );
    assert_eq!(kernel.revision(), 1);

    let watcher = {
        let kernel = Arc::clone(&kernel);
        let center = Arc::clone(&center);
        tokio::spawn(async move { kernel.watch(center.as_ref()).await })
    };
    wait_for_chain(&kernel, &["always-deny"]).await;
    assert_eq!(kernel.revision(), 1);

    watcher.abort();
}

#[tokio::test]
#[serial]
async fn metrics_bind_replaces_configured_exporter_address() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("admission.yaml");
    std::fs::write(
        &path,
        "observe:\n  prom_enable: false\n  prom_bind: \"127.0.0.1:9\"\n",
    )
    .unwrap();

    AdmissionKernel::bootstrap_with(Some(&path), Some("127.0.0.1:0".parse().unwrap())).unwrap();
    let policy = current_policy();
    assert!(policy.prom_enable);
    assert_eq!(policy.prom_bind, "127.0.0.1:0");

    AdmissionKernel::bootstrap(Some(&path)).unwrap();
    let policy = current_policy();
    assert!(!policy.prom_enable);
    assert_eq!(policy.prom_bind, "127.0.0.1:9");

    set_policy(ObsPolicyView::default());
}
