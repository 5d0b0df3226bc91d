//! Health check HTTP server for Kubernetes probes
//!
//! `/healthz` answers as long as the process runs. `/readyz` answers once
//! the server is bound, the watch caches have synced and the gateway
//! configuration can be read.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::gateway_client::GatewayClient;

pub struct HealthState<C: GatewayClient> {
    started: AtomicBool,
    synced: AtomicBool,
    client: Arc<C>,
}

impl<C: GatewayClient> HealthState<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self {
            started: AtomicBool::new(false),
            synced: AtomicBool::new(false),
            client,
        }
    }

    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
        info!("Health check: operator marked as started");
    }

    /// Record that the watch caches finished their initial list
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
        info!("Health check: caches synced");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Serve the probe endpoints on localhost until a fatal error
///
/// The operator only counts as started once the listener is bound.
pub async fn run_health_server<C: GatewayClient + 'static>(
    state: Arc<HealthState<C>>,
    port: u16,
) -> std::io::Result<()> {
    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<C>))
        .with_state(state.clone());

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port, "Health check server listening");
    state.mark_started();

    axum::serve(listener, app).await
}

async fn healthz() -> StatusCode {
    debug!("Liveness probe: OK");
    StatusCode::OK
}

async fn readyz<C: GatewayClient + 'static>(State(state): State<Arc<HealthState<C>>>) -> StatusCode {
    if !state.is_started() {
        debug!("Readiness probe: NOT READY (startup incomplete)");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    if !state.is_synced() {
        debug!("Readiness probe: NOT READY (caches not synced)");
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    match state.client.get().await {
        Ok(_) => {
            debug!("Readiness probe: OK");
            StatusCode::OK
        }
        Err(e) => {
            warn!(error = %e, "Readiness probe: NOT READY (gateway unreachable)");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
