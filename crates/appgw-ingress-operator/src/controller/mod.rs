//! Reconcile loop
//!
//! Reflectors keep the watch caches current. Any watch event, the periodic
//! resync tick or a scheduled retry triggers a reconcile pass: snapshot the
//! caches, validate, build, validate again and apply the result through the
//! [`GatewayClient`].

pub mod retry;

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream};
use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::EventType;
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::appgw::annotations;
use crate::appgw::{
    AppGwConfigBuilder, ApplicationGateway, BuildError, ConfigBuilder, ConfigBuilderContext, Identifier,
    ValidationError,
};
use crate::environment::EnvVariables;
use crate::events::{reasons, EventRecorder};
use crate::gateway_client::{GatewayClient, GatewayClientError};
use crate::health::HealthState;
use crate::istio::VirtualService;
use crate::k8scontext::{ClusterCache, StoreCache, Stores};
use crate::prohibited_target::AzureIngressProhibitedTarget;

use self::retry::{compute_backoff, ErrorKind, RetryTracker};

/// Quiet period that coalesces bursts of watch events into one pass
const DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("gateway client error: {0}")]
    Gateway(#[from] GatewayClientError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Gateway(e) if e.is_transient() => ErrorKind::Transient,
            ReconcileError::Gateway(_) => ErrorKind::Permanent,
            ReconcileError::Validation(_) => ErrorKind::Permanent,
            ReconcileError::Build(BuildError::FrontendIpConfiguration) => ErrorKind::Permanent,
            // Endpoints or secrets may still be arriving
            ReconcileError::Build(_) => ErrorKind::Transient,
        }
    }
}

/// What a successful pass did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    Unchanged,
}

/// Cluster objects the build reads as lists
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub ingresses: Vec<Ingress>,
    pub services: Vec<Service>,
    pub virtual_services: Vec<VirtualService>,
    pub prohibited_targets: Vec<AzureIngressProhibitedTarget>,
}

impl Snapshot {
    /// Keep only the ingresses this operator owns
    fn retain_managed_ingresses(&mut self) {
        self.ingresses
            .retain(annotations::is_application_gateway_ingress);
    }
}

/// Reader halves of every reflector
#[derive(Clone)]
pub struct WatchStores {
    pub cluster: Stores,
    pub ingresses: Store<Ingress>,
    pub prohibited_targets: Store<AzureIngressProhibitedTarget>,
    pub virtual_services: Option<Store<VirtualService>>,
}

fn sorted<K: Resource + Clone>(items: Vec<Arc<K>>) -> Vec<K> {
    let mut items: Vec<K> = items.into_iter().map(|item| (*item).clone()).collect();
    items.sort_by(|a, b| {
        (a.meta().namespace.as_deref(), a.meta().name.as_deref())
            .cmp(&(b.meta().namespace.as_deref(), b.meta().name.as_deref()))
    });
    items
}

impl WatchStores {
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            ingresses: sorted(self.ingresses.state()),
            services: sorted(self.cluster.services.state()),
            virtual_services: self
                .virtual_services
                .as_ref()
                .map(|store| sorted(store.state()))
                .unwrap_or_default(),
            prohibited_targets: sorted(self.prohibited_targets.state()),
        }
    }

    async fn wait_until_ready(&self) -> bool {
        let core = futures::try_join!(
            self.ingresses.wait_until_ready(),
            self.prohibited_targets.wait_until_ready(),
            self.cluster.services.wait_until_ready(),
            self.cluster.endpoints.wait_until_ready(),
            self.cluster.pods.wait_until_ready(),
            self.cluster.secrets.wait_until_ready(),
        );
        if core.is_err() {
            return false;
        }
        match &self.virtual_services {
            Some(store) => store.wait_until_ready().await.is_ok(),
            None => true,
        }
    }
}

/// One reconcile target: the gateway
pub struct Controller<G: GatewayClient> {
    cache: Arc<dyn ClusterCache>,
    gateway: Arc<G>,
    recorder: Arc<dyn EventRecorder>,
    env: EnvVariables,
    identifier: Identifier,
}

impl<G: GatewayClient> Controller<G> {
    pub fn new(
        cache: Arc<dyn ClusterCache>,
        gateway: Arc<G>,
        recorder: Arc<dyn EventRecorder>,
        env: EnvVariables,
    ) -> Self {
        let identifier = Identifier::from_env(&env);
        Self {
            cache,
            gateway,
            recorder,
            env,
            identifier,
        }
    }

    /// Build a configuration from `snapshot` and apply it if it differs
    #[instrument(skip_all, fields(ingresses = snapshot.ingresses.len()))]
    pub async fn reconcile(&self, mut snapshot: Snapshot) -> Result<ReconcileOutcome, ReconcileError> {
        snapshot.retain_managed_ingresses();
        let original = self.gateway.get().await?;

        let builder = AppGwConfigBuilder::new(
            self.cache.clone(),
            self.identifier.clone(),
            original.clone(),
            self.recorder.clone(),
        );
        let ctx = ConfigBuilderContext::new(
            snapshot.ingresses,
            snapshot.services,
            snapshot.virtual_services,
            self.env.clone(),
            snapshot.prohibited_targets,
        );

        builder.pre_build_validate(&ctx)?;
        let generated = builder.build(&ctx)?;
        if let Err(e) = builder.post_build_validate(&ctx, &generated) {
            self.report(&ctx, EventType::Warning, reasons::VALIDATION_FAILED, &e.to_string());
            return Err(e.into());
        }

        if same_configuration(&original, &generated) {
            debug!("Gateway configuration unchanged");
            return Ok(ReconcileOutcome::Unchanged);
        }

        self.gateway.update(&generated).await?;
        info!(
            listeners = generated.properties.http_listeners.len(),
            rules = generated.properties.request_routing_rules.len(),
            pools = generated.properties.backend_address_pools.len(),
            "Applied gateway configuration"
        );
        self.report(&ctx, EventType::Normal, reasons::GATEWAY_UPDATED, "Application Gateway configuration updated");
        Ok(ReconcileOutcome::Applied)
    }

    fn report(&self, ctx: &ConfigBuilderContext, event_type: EventType, reason: &str, message: &str) {
        for ingress in &ctx.ingress_list {
            self.recorder
                .event(&ingress.object_ref(&()), event_type.clone(), reason, message);
        }
    }
}

/// Equal apart from the management tag, which changes with every release
fn same_configuration(original: &ApplicationGateway, generated: &ApplicationGateway) -> bool {
    let mut original = original.clone();
    let mut generated = generated.clone();
    original.tags.remove(crate::appgw::MANAGED_BY_K8S_INGRESS);
    generated.tags.remove(crate::appgw::MANAGED_BY_K8S_INGRESS);
    original == generated
}

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Feed `writer` from a watch on `api`, yielding once per event
fn watch<K>(api: Api<K>, writer: Writer<K>) -> BoxStream<'static, ()>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .touched_objects()
        .filter_map(|event| async move {
            match event {
                Ok(_) => Some(()),
                Err(e) => {
                    warn!(error = %e, "Watch stream error");
                    None
                }
            }
        })
        .boxed()
}

/// Start the reflectors; returns the stores and the merged trigger stream
pub fn start_watches(client: &Client, env: &EnvVariables) -> (WatchStores, BoxStream<'static, ()>) {
    let namespace = env.watch_namespace();

    let (ingresses, ingress_writer) = reflector::store::<Ingress>();
    let (services, service_writer) = reflector::store::<Service>();
    let (endpoints, endpoints_writer) = reflector::store::<Endpoints>();
    let (pods, pod_writer) = reflector::store::<Pod>();
    let (secrets, secret_writer) = reflector::store::<Secret>();
    let (prohibited_targets, prohibited_writer) = reflector::store::<AzureIngressProhibitedTarget>();

    let mut streams = vec![
        watch(api::<Ingress>(client, namespace), ingress_writer),
        watch(api::<Service>(client, namespace), service_writer),
        watch(api::<Endpoints>(client, namespace), endpoints_writer),
        watch(api::<Pod>(client, namespace), pod_writer),
        watch(api::<Secret>(client, namespace), secret_writer),
        watch(api::<AzureIngressProhibitedTarget>(client, namespace), prohibited_writer),
    ];

    let virtual_services = if env.enable_istio_integration {
        let (store, writer) = reflector::store::<VirtualService>();
        streams.push(watch(api::<VirtualService>(client, namespace), writer));
        Some(store)
    } else {
        None
    };

    let stores = WatchStores {
        cluster: Stores {
            endpoints,
            services,
            pods,
            secrets,
        },
        ingresses,
        prohibited_targets,
        virtual_services,
    };
    (stores, stream::select_all(streams).boxed())
}

/// Run until the watch streams end
///
/// Waits for the initial list of every watch before the first pass.
pub async fn run<G: GatewayClient + 'static>(
    stores: WatchStores,
    mut triggers: BoxStream<'static, ()>,
    cache: Arc<StoreCache>,
    controller: Controller<G>,
    health: Arc<HealthState<G>>,
    resync_period: Duration,
) {
    // Reflectors only make progress while their streams are polled
    let ready = stores.wait_until_ready();
    tokio::pin!(ready);
    loop {
        tokio::select! {
            synced = &mut ready => {
                if !synced {
                    error!("Watch stores dropped before their initial sync");
                    return;
                }
                break;
            }
            next = triggers.next() => {
                if next.is_none() {
                    error!("Watch streams ended before their initial sync");
                    return;
                }
            }
        }
    }
    cache.mark_synced();
    health.mark_synced();
    info!("Caches synced, starting reconcile loop");

    let mut resync = interval(resync_period);
    resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut tracker = RetryTracker::new();
    let mut retry_at: Option<Instant> = None;

    loop {
        let retry = async move {
            match retry_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            next = triggers.next() => {
                if next.is_none() {
                    warn!("Watch streams ended");
                    return;
                }
                // Coalesce the burst
                sleep(DEBOUNCE).await;
                while let Some(Some(())) = triggers.next().now_or_never() {}
                debug!("Reconcile triggered by watch event");
            }
            _ = resync.tick() => debug!("Periodic resync"),
            _ = retry => debug!("Retrying after failure"),
        }
        retry_at = None;

        match controller.reconcile(stores.snapshot()).await {
            Ok(outcome) => {
                tracker.reset();
                debug!(?outcome, "Reconcile complete");
            }
            Err(e) => {
                let attempt = tracker.increment();
                error!(error = %e, attempt, "Reconcile failed");
                retry_at = compute_backoff(attempt, e.kind()).map(|delay| Instant::now() + delay);
            }
        }
    }
}
