use crate::metrics::ensure_metrics;
use crate::policy::current_policy;
use axum::{routing::get, Router};
use once_cell::sync::Lazy;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::OnceCell as TokioOnceCell;
use tokio::task::JoinHandle;
use tracing::{info, warn};

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static PROM_SERVER: TokioOnceCell<JoinHandle<()>> = TokioOnceCell::const_new();

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

pub fn render_prometheus() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&global_registry().gather(), &mut buffer) {
        warn!(?err, "failed to encode prometheus metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Starts the `/metrics` listener once, if enabled by policy. Must be called
/// from within a tokio runtime.
pub fn ensure_prometheus() {
    let policy = current_policy();
    if !policy.prom_enable {
        return;
    }
    ensure_metrics();

    if PROM_SERVER.get().is_some() {
        return;
    }

    let bind: SocketAddr = policy
        .prom_bind
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 9090)));

    let _ = PROM_SERVER.set(spawn_metrics_server(bind));
}

pub fn spawn_metrics_server(bind: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        match TcpListener::bind(bind).await {
            Ok(listener) => {
                info!(addr = %bind, "admission metrics listening");
                let router = Router::new().route("/metrics", get(scrape_handler));
                if let Err(err) = axum::serve(listener, router.into_make_service()).await {
                    warn!(%err, "prometheus server exited unexpectedly");
                }
            }
            Err(err) => warn!(%err, "failed to bind prometheus listener"),
        }
    })
}

async fn scrape_handler() -> String {
    render_prometheus()
}
