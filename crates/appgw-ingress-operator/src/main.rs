use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::Client;
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use appgw_ingress_operator::controller::{self, Controller};
use appgw_ingress_operator::environment::EnvVariables;
use appgw_ingress_operator::events::KubeEventRecorder;
use appgw_ingress_operator::gateway_client::FileGatewayClient;
use appgw_ingress_operator::health::{run_health_server, HealthState};
use appgw_ingress_operator::k8scontext::StoreCache;
use appgw_ingress_operator::version;

const CONTROLLER_NAME: &str = "appgw-ingress-operator";

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs for production
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let env = EnvVariables::parse();
    info!(
        version = version::VERSION,
        commit = version::GIT_COMMIT,
        gateway = %env.app_gateway_name,
        resource_group = %env.resource_group_name,
        brownfield = env.enable_brownfield_deployment,
        istio = env.enable_istio_integration,
        "appgw-ingress-operator starting"
    );
    if env.app_gateway_name.is_empty() {
        bail!("APPGW_NAME must be set");
    }

    let kube_client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let gateway = Arc::new(FileGatewayClient::new(&env.config_file));
    info!(path = %gateway.path().display(), "Using file-backed gateway configuration");

    let (recorder, recorder_task) = KubeEventRecorder::spawn(kube_client.clone(), CONTROLLER_NAME);

    let (stores, triggers) = controller::start_watches(&kube_client, &env);
    let cache = Arc::new(StoreCache::new(stores.cluster.clone()));
    let health = Arc::new(HealthState::new(gateway.clone()));

    let resync_period = Duration::from_secs(env.resync_period_seconds.max(1));
    let health_port = env.health_probe_port;
    let reconciler = Controller::new(cache.clone(), gateway, Arc::new(recorder), env);

    let controller_task = tokio::spawn(controller::run(
        stores,
        triggers,
        cache,
        reconciler,
        health.clone(),
        resync_period,
    ));
    let health_task = tokio::spawn(run_health_server(health, health_port));

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to setup SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to setup SIGINT handler")?;

    select! {
        result = controller_task => {
            // Exiting lets Kubernetes restart the pod
            return handle_task_exit("controller", result);
        }
        result = health_task => {
            match result {
                Ok(Err(e)) => return Err(e).context("Health server failed"),
                other => return handle_task_exit("health server", other.map(|_| ())),
            }
        }
        result = recorder_task => {
            return handle_task_exit("event recorder", result);
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Turn a background task exit into an error so the pod restarts
fn handle_task_exit(name: &str, result: std::result::Result<(), tokio::task::JoinError>) -> Result<()> {
    match result {
        Ok(()) => {
            error!(task = name, "Task exited unexpectedly");
            bail!("{} exited unexpectedly", name)
        }
        Err(e) if e.is_panic() => {
            error!(task = name, "Task panicked");
            bail!("{} panicked: {:?}", name, e.into_panic())
        }
        Err(e) if e.is_cancelled() => {
            warn!(task = name, "Task was cancelled");
            bail!("{} was cancelled", name)
        }
        Err(e) => {
            error!(task = name, error = ?e, "Task failed");
            bail!("{} failed: {}", name, e)
        }
    }
}
