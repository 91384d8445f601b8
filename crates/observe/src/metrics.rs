use crate::exporter::global_registry;
use crate::guard::guard_label;
use crate::policy::current_policy;
use admission_core_types::Attributes;
use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use prometheus::{
    core::Collector, histogram_opts, opts, HistogramVec, IntCounterVec, Registry,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

const CONTROLLER_DURATION_NAME: &str = "admission_controller_admission_duration_seconds";
const STEP_DURATION_NAME: &str = "admission_step_admission_duration_seconds";
const LATENCY_BUCKETS: [f64; 6] = [0.005, 0.025, 0.1, 0.5, 1.0, 2.5];

/// Admission phase reported with every observation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Step {
    Mutating,
    Validating,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Mutating => "mutating",
            Step::Validating => "validating",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of admission telemetry.
///
/// Observations are fire-and-forget: implementations must not panic and have
/// no way to fail the request being admitted.
pub trait MetricsSink: Send + Sync {
    /// One call per handler invocation.
    fn observe_admission_controller(
        &self,
        elapsed: Duration,
        failed: bool,
        handler: &str,
        attributes: &Attributes,
        step: Step,
    );

    /// One call per mutate or validate pass over a chain.
    fn observe_admission_step(
        &self,
        elapsed: Duration,
        failed: bool,
        attributes: &Attributes,
        step: Step,
    );
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn observe_admission_controller(&self, _: Duration, _: bool, _: &str, _: &Attributes, _: Step) {
    }

    fn observe_admission_step(&self, _: Duration, _: bool, _: &Attributes, _: Step) {}
}

lazy_static! {
    static ref CONTROLLER_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            CONTROLLER_DURATION_NAME,
            "Admission controller latency in seconds, by controller name, operation and step",
            LATENCY_BUCKETS.to_vec()
        ),
        &["name", "operation", "rejected", "type"]
    )
    .unwrap();
    static ref STEP_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            STEP_DURATION_NAME,
            "Admission sub-step latency in seconds, by operation, step and resource",
            LATENCY_BUCKETS.to_vec()
        ),
        &["operation", "rejected", "type", "resource", "subresource"]
    )
    .unwrap();
    static ref CONTROLLER_REJECTIONS: IntCounterVec = IntCounterVec::new(
        opts!(
            "admission_controller_rejections_total",
            "Requests rejected by an admission controller"
        ),
        &["name", "operation", "type"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register admission metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CONTROLLER_DURATION.clone());
    register(registry, STEP_DURATION.clone());
    register(registry, CONTROLLER_REJECTIONS.clone());
}

static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

pub fn ensure_metrics() {
    REGISTER_ONCE.get_or_init(|| register_metrics(global_registry()));
}

fn rejected_label(failed: bool) -> &'static str {
    if failed {
        "true"
    } else {
        "false"
    }
}

/// Records observations into the process-wide Prometheus registry.
#[derive(Clone, Copy, Debug)]
pub struct PrometheusSink;

impl PrometheusSink {
    pub fn new() -> Self {
        ensure_metrics();
        Self
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for PrometheusSink {
    fn observe_admission_controller(
        &self,
        elapsed: Duration,
        failed: bool,
        handler: &str,
        attributes: &Attributes,
        step: Step,
    ) {
        let policy = current_policy();
        if elapsed >= Duration::from_millis(policy.slow_threshold_ms) {
            warn!(
                handler,
                step = %step,
                operation = %attributes.operation(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow admission handler"
            );
        }
        if !policy.enable_metrics {
            return;
        }
        let operation = attributes.operation().as_str();
        CONTROLLER_DURATION
            .with_label_values(&[handler, operation, rejected_label(failed), step.as_str()])
            .observe(elapsed.as_secs_f64());
        if failed {
            CONTROLLER_REJECTIONS
                .with_label_values(&[handler, operation, step.as_str()])
                .inc();
        }
    }

    fn observe_admission_step(
        &self,
        elapsed: Duration,
        failed: bool,
        attributes: &Attributes,
        step: Step,
    ) {
        if !current_policy().enable_metrics {
            return;
        }
        let resource = guard_label(
            STEP_DURATION_NAME,
            "resource",
            &attributes.resource().group_resource(),
        );
        let subresource = guard_label(STEP_DURATION_NAME, "subresource", attributes.subresource());
        STEP_DURATION
            .with_label_values(&[
                attributes.operation().as_str(),
                rejected_label(failed),
                step.as_str(),
                resource.as_str(),
                subresource.as_str(),
            ])
            .observe(elapsed.as_secs_f64());
    }
}

static GLOBAL_SINK: OnceCell<Arc<RwLock<Arc<dyn MetricsSink>>>> = OnceCell::new();

fn global_cell() -> &'static Arc<RwLock<Arc<dyn MetricsSink>>> {
    GLOBAL_SINK.get_or_init(|| {
        let sink: Arc<dyn MetricsSink> = Arc::new(PrometheusSink::new());
        Arc::new(RwLock::new(sink))
    })
}

pub fn set_global_sink(sink: Arc<dyn MetricsSink>) {
    *global_cell().write() = sink;
}

pub fn global_sink() -> Arc<dyn MetricsSink> {
    Arc::clone(&global_cell().read())
}

/// Forwards to whichever sink is installed globally at observation time.
#[derive(Clone, Copy, Debug, Default)]
pub struct GlobalSink;

impl MetricsSink for GlobalSink {
    fn observe_admission_controller(
        &self,
        elapsed: Duration,
        failed: bool,
        handler: &str,
        attributes: &Attributes,
        step: Step,
    ) {
        global_sink().observe_admission_controller(elapsed, failed, handler, attributes, step);
    }

    fn observe_admission_step(
        &self,
        elapsed: Duration,
        failed: bool,
        attributes: &Attributes,
        step: Step,
    ) {
        global_sink().observe_admission_step(elapsed, failed, attributes, step);
    }
}
