use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use admission_chain::Chain;
use admission_core_types::{AdmissionError, Attributes, Operation};
use admission_observe::exporter::ensure_prometheus;
use admission_observe::policy::set_policy;
use admission_observe::tracing::{init_tracing, step_span};
use admission_observe::{GlobalSink, MetricsSink, ObsPolicyView, Step};
use admission_policy_center::{
    load_snapshot, AdmissionPolicySnapshot, ObservePolicy, PolicyCenter,
};
use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::errors::KernelResult;
use crate::plugins::PluginRegistry;

/// A chain together with the policy revision it was built from.
#[derive(Clone)]
struct Installed {
    chain: Arc<Chain>,
    revision: u64,
}

struct SwitchState {
    current: Installed,
    lkg: Installed,
}

/// Active chain plus the last known good one, replaced as a single value so
/// that concurrent swaps cannot interleave.
struct ChainSwitch {
    state: ArcSwap<SwitchState>,
}

impl ChainSwitch {
    fn new(initial: Installed) -> Self {
        Self {
            state: ArcSwap::from_pointee(SwitchState {
                current: initial.clone(),
                lkg: initial,
            }),
        }
    }

    fn current(&self) -> Installed {
        self.state.load().current.clone()
    }

    fn get(&self) -> Arc<Chain> {
        Arc::clone(&self.state.load().current.chain)
    }

    /// Installs `next` and returns what it replaced.
    fn swap(&self, next: Installed) -> Installed {
        let replaced = self.state.rcu(|state| SwitchState {
            current: next.clone(),
            lkg: state.current.clone(),
        });
        replaced.current.clone()
    }

    fn rollback(&self) -> Installed {
        let replaced = self.state.rcu(|state| SwitchState {
            current: state.lkg.clone(),
            lkg: state.lkg.clone(),
        });
        replaced.lkg.clone()
    }
}

/// Runs admission reviews against a chain built from policy, and rebuilds
/// that chain when the policy changes.
///
/// A review loads the chain once, so a concurrent reconfiguration never
/// splits one request across two chains.
pub struct AdmissionKernel {
    registry: PluginRegistry,
    sink: Arc<dyn MetricsSink>,
    switch: ChainSwitch,
}

impl AdmissionKernel {
    /// Kernel reporting to the process-wide metrics sink.
    pub fn from_snapshot(
        registry: PluginRegistry,
        snapshot: &AdmissionPolicySnapshot,
    ) -> KernelResult<Self> {
        Self::with_sink(registry, snapshot, Arc::new(GlobalSink))
    }

    pub fn with_sink(
        registry: PluginRegistry,
        snapshot: &AdmissionPolicySnapshot,
        sink: Arc<dyn MetricsSink>,
    ) -> KernelResult<Self> {
        let handlers = registry.new_from_plugins(&snapshot.plugins)?;
        let chain = Arc::new(Chain::with_sink(handlers, Arc::clone(&sink)));
        info!(rev = snapshot.rev, plugins = ?chain.names(), "admission chain built");
        Ok(Self {
            registry,
            sink,
            switch: ChainSwitch::new(Installed {
                chain,
                revision: snapshot.rev,
            }),
        })
    }

    /// Loads policy from `path` and the environment, applies its observability
    /// settings, and builds a kernel over the builtin plugins.
    ///
    /// The metrics listener is only started when a tokio runtime is running.
    pub fn bootstrap(path: Option<&Path>) -> KernelResult<Self> {
        Self::bootstrap_with(path, None)
    }

    /// Like [`AdmissionKernel::bootstrap`]; a `metrics_bind` address turns the
    /// exporter on and replaces the configured `prom_bind`.
    pub fn bootstrap_with(
        path: Option<&Path>,
        metrics_bind: Option<SocketAddr>,
    ) -> KernelResult<Self> {
        let mut snapshot = load_snapshot(path)?;
        if let Some(bind) = metrics_bind {
            snapshot.observe.prom_enable = true;
            snapshot.observe.prom_bind = bind.to_string();
        }
        apply_observe_policy(&snapshot.observe);
        init_tracing();
        if tokio::runtime::Handle::try_current().is_ok() {
            ensure_prometheus();
        }
        Self::from_snapshot(PluginRegistry::builtin(), &snapshot)
    }

    pub fn chain(&self) -> Arc<Chain> {
        self.switch.get()
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Policy revision the active chain was built from.
    pub fn revision(&self) -> u64 {
        self.switch.current().revision
    }

    pub fn handles(&self, operation: Operation) -> bool {
        self.switch.get().handles(operation)
    }

    /// Mutating phase, then validating phase, on the same chain.
    pub fn review(&self, attributes: &mut Attributes) -> Result<(), AdmissionError> {
        let chain = self.switch.get();
        let operation = attributes.operation();
        step_span(Step::Mutating, operation).in_scope(|| chain.mutate(attributes))?;
        step_span(Step::Validating, operation).in_scope(|| chain.validate(attributes))
    }

    /// Builds a chain for `snapshot` and swaps it in. On error the active
    /// chain is left untouched.
    pub fn reconfigure(&self, snapshot: &AdmissionPolicySnapshot) -> KernelResult<()> {
        let handlers = self.registry.new_from_plugins(&snapshot.plugins)?;
        let chain = Arc::new(Chain::with_sink(handlers, Arc::clone(&self.sink)));
        info!(rev = snapshot.rev, plugins = ?chain.names(), "admission chain reconfigured");
        self.switch.swap(Installed {
            chain,
            revision: snapshot.rev,
        });
        Ok(())
    }

    /// Reinstates the chain, and its revision, that was active before the
    /// last reconfiguration.
    pub fn rollback(&self) -> Arc<Chain> {
        let restored = self.switch.rollback();
        warn!(
            rev = restored.revision,
            plugins = ?restored.chain.names(),
            "admission chain rolled back"
        );
        restored.chain
    }

    /// Follows `center` until its publisher goes away, starting with the
    /// snapshot it holds now. Snapshots whose chain cannot be built are
    /// logged and skipped.
    pub async fn watch<C>(&self, center: &C)
    where
        C: PolicyCenter + ?Sized,
    {
        let mut rx = center.subscribe();
        let initial = Arc::clone(&rx.borrow_and_update());
        self.apply(&initial);
        while rx.changed().await.is_ok() {
            let snapshot = Arc::clone(&rx.borrow_and_update());
            self.apply(&snapshot);
        }
    }

    fn apply(&self, snapshot: &AdmissionPolicySnapshot) {
        apply_observe_policy(&snapshot.observe);
        if let Err(err) = self.reconfigure(snapshot) {
            warn!(rev = snapshot.rev, %err, "admission chain rebuild failed, keeping previous chain");
        }
    }
}

/// Publishes the observability half of a policy snapshot to the metrics and
/// tracing layers.
pub fn apply_observe_policy(observe: &ObservePolicy) {
    set_policy(ObsPolicyView {
        enable_metrics: observe.enable_metrics,
        enable_tracing: observe.enable_tracing,
        slow_threshold_ms: observe.slow_threshold_ms,
        series_limit: observe.series_limit,
        prom_enable: observe.prom_enable,
        prom_bind: observe.prom_bind.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{ALWAYS_ADMIT, ALWAYS_DENY};
    use admission_observe::RecordingSink;
    use admission_policy_center::default_snapshot;

    fn installed(revision: u64) -> Installed {
        Installed {
            chain: Arc::new(Chain::empty()),
            revision,
        }
    }

    #[test]
    fn switch_keeps_last_known_good() {
        let switch = ChainSwitch::new(installed(0));
        let first = installed(1);
        switch.swap(first.clone());
        assert!(Arc::ptr_eq(&switch.get(), &first.chain));
        let replaced = switch.swap(installed(2));
        assert_eq!(replaced.revision, 1);
        let restored = switch.rollback();
        assert!(Arc::ptr_eq(&restored.chain, &first.chain));
        assert_eq!(switch.current().revision, 1);
    }

    #[test]
    fn concurrent_swaps_keep_the_true_predecessor() {
        let switch = ChainSwitch::new(installed(0));
        let transitions: Vec<(u64, u64)> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8u64)
                .map(|worker| {
                    let switch = &switch;
                    scope.spawn(move || {
                        (0..250u64)
                            .map(|i| {
                                let next = 1 + worker * 1_000 + i;
                                (switch.swap(installed(next)).revision, next)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().unwrap())
                .collect()
        });

        let current = switch.current().revision;
        let (predecessor, _) = transitions
            .iter()
            .find(|(_, next)| *next == current)
            .copied()
            .unwrap();
        assert_eq!(switch.rollback().revision, predecessor);
        assert_eq!(switch.current().revision, predecessor);
    }

    #[test]
    fn failed_reconfigure_keeps_active_chain() {
        let sink = Arc::new(RecordingSink::new());
        let kernel =
            AdmissionKernel::with_sink(PluginRegistry::builtin(), &default_snapshot(), sink)
                .unwrap();
        let mut broken = default_snapshot();
        broken.rev = 9;
        broken.plugins.order = vec![ALWAYS_DENY.into(), "image-policy".into()];
        assert!(kernel.reconfigure(&broken).is_err());
        assert_eq!(kernel.chain().names(), vec![ALWAYS_ADMIT]);
        assert_eq!(kernel.revision(), 1);
    }

    #[test]
    fn rollback_restores_previous_chain() {
        let sink = Arc::new(RecordingSink::new());
        let kernel =
            AdmissionKernel::with_sink(PluginRegistry::builtin(), &default_snapshot(), sink)
                .unwrap();
        let mut deny = default_snapshot();
        deny.rev = 2;
        deny.plugins.order = vec![ALWAYS_DENY.into()];
        kernel.reconfigure(&deny).unwrap();
        assert_eq!(kernel.chain().names(), vec![ALWAYS_DENY]);
        assert_eq!(kernel.revision(), 2);
        let restored = kernel.rollback();
        assert_eq!(restored.names(), vec![ALWAYS_ADMIT]);
        assert_eq!(kernel.chain().names(), vec![ALWAYS_ADMIT]);
        assert_eq!(kernel.revision(), 1);
    }
}
