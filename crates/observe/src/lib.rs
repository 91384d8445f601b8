pub mod exporter;
pub mod guard;
pub mod metrics;
pub mod policy;
pub mod recorder;
pub mod tracing;

pub use metrics::{global_sink, set_global_sink, GlobalSink, MetricsSink, NoopSink, PrometheusSink, Step};
pub use policy::{ObsPolicyView, PolicyHandle};
pub use recorder::RecordingSink;
