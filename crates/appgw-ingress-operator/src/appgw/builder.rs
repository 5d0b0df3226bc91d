//! Gateway configuration builder
//!
//! [`AppGwConfigBuilder::build`] runs the stages in dependency order. Each
//! stage writes its collection into the configuration being built and hands
//! the next stage the bindings it depends on, so a stage cannot run before
//! the ones it needs. Any stage failure discards the whole configuration.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use thiserror::Error;
use tracing::{debug, error, info};

use super::backends;
use super::identifiers::Identifier;
use super::model::ApplicationGateway;
use super::validators::{self, ValidationError, POST_BUILD_VALIDATORS, PRE_BUILD_VALIDATORS};
use crate::brownfield::{self, ExistingResources};
use crate::environment::EnvVariables;
use crate::events::EventRecorder;
use crate::istio::VirtualService;
use crate::k8scontext::ClusterCache;
use crate::prohibited_target::AzureIngressProhibitedTarget;
use crate::version;

/// Tag identifying a gateway managed by this operator
pub const MANAGED_BY_K8S_INGRESS: &str = "managed-by-k8s-ingress";

/// Caller-facing build failure, one per stage
///
/// The underlying cause is logged where it happens.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("unable to generate health probes")]
    HealthProbes,

    #[error("unable to generate backend http settings")]
    BackendHttpSettings,

    #[error("unable to generate backend address pools")]
    BackendAddressPools,

    #[error("unable to generate frontend listeners")]
    Listeners,

    #[error("gateway has no usable frontend IP configuration")]
    FrontendIpConfiguration,

    #[error("unable to generate request routing rules")]
    RequestRoutingRules,
}

/// Cause of a stage failure (logged, never returned)
#[derive(Debug, Error)]
pub(crate) enum StageError {
    #[error("unable to resolve backend port for {0}")]
    UnresolvedBackendPorts(String),

    #[error("no {0} frontend IP configuration on the gateway")]
    NoFrontendIpConfiguration(&'static str),

    #[error("routing target {0} has no backend bindings")]
    MissingBinding(String),
}

/// Input of one build pass
///
/// Immutable for the duration of the pass. When brownfield deployment is
/// enabled the ingresses are stored with their prohibited routes pruned.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilderContext {
    pub ingress_list: Vec<Ingress>,
    pub service_list: Vec<Service>,
    pub istio_virtual_services: Vec<VirtualService>,
    pub env: EnvVariables,
    pub prohibited_targets: Vec<AzureIngressProhibitedTarget>,
}

impl ConfigBuilderContext {
    pub fn new(
        ingress_list: Vec<Ingress>,
        service_list: Vec<Service>,
        istio_virtual_services: Vec<VirtualService>,
        env: EnvVariables,
        prohibited_targets: Vec<AzureIngressProhibitedTarget>,
    ) -> Self {
        let ingress_list = if env.enable_brownfield_deployment {
            ingress_list
                .into_iter()
                .map(|mut ingress| {
                    let rules = brownfield::prune_ingress_rules(&ingress, &prohibited_targets);
                    if let Some(spec) = ingress.spec.as_mut() {
                        spec.rules = rules;
                    }
                    ingress
                })
                .collect()
        } else {
            ingress_list
        };
        let istio_virtual_services = if env.enable_istio_integration {
            istio_virtual_services
        } else {
            Vec::new()
        };

        Self {
            ingress_list,
            service_list,
            istio_virtual_services,
            env,
            prohibited_targets,
        }
    }

    pub fn find_ingress(&self, namespace: &str, name: &str) -> Option<&Ingress> {
        self.ingress_list.iter().find(|ingress| {
            ingress.metadata.namespace.as_deref() == Some(namespace)
                && ingress.metadata.name.as_deref() == Some(name)
        })
    }

    pub fn find_virtual_service(&self, namespace: &str, name: &str) -> Option<&VirtualService> {
        self.istio_virtual_services.iter().find(|vs| {
            vs.metadata.namespace.as_deref() == Some(namespace) && vs.metadata.name.as_deref() == Some(name)
        })
    }
}

/// Builds a gateway configuration from a cluster snapshot
pub trait ConfigBuilder {
    /// Check the raw inputs for misconfiguration
    fn pre_build_validate(&self, ctx: &ConfigBuilderContext) -> Result<(), ValidationError>;

    /// Generate the full gateway configuration
    fn build(&self, ctx: &ConfigBuilderContext) -> Result<ApplicationGateway, BuildError>;

    /// Check a generated configuration against the gateway's requirements
    fn post_build_validate(
        &self,
        ctx: &ConfigBuilderContext,
        gateway: &ApplicationGateway,
    ) -> Result<(), ValidationError>;
}

pub struct AppGwConfigBuilder {
    pub(crate) cache: Arc<dyn ClusterCache>,
    pub(crate) identifier: Identifier,
    pub(crate) original: ApplicationGateway,
    pub(crate) recorder: Arc<dyn EventRecorder>,
}

impl AppGwConfigBuilder {
    /// `original` is the gateway as currently deployed; every build starts from a copy of it.
    pub fn new(
        cache: Arc<dyn ClusterCache>,
        identifier: Identifier,
        original: ApplicationGateway,
        recorder: Arc<dyn EventRecorder>,
    ) -> Self {
        Self {
            cache,
            identifier,
            original,
            recorder,
        }
    }
}

impl ConfigBuilder for AppGwConfigBuilder {
    fn pre_build_validate(&self, ctx: &ConfigBuilderContext) -> Result<(), ValidationError> {
        validators::run_validators(
            PRE_BUILD_VALIDATORS,
            self.recorder.as_ref(),
            &self.original.properties,
            &ctx.env,
            &ctx.ingress_list,
            &ctx.service_list,
        )
    }

    fn build(&self, ctx: &ConfigBuilderContext) -> Result<ApplicationGateway, BuildError> {
        let mut config = self.original.clone();

        let backend_ids = backends::new_backend_ids_filtered(ctx, self.cache.as_ref(), self.recorder.as_ref());
        let istio_destinations = backends::new_istio_destination_ids_filtered(ctx, self.cache.as_ref());
        debug!(
            backends = backend_ids.len(),
            istio_destinations = istio_destinations.len(),
            "Collected backends"
        );

        debug!("Generating health probes");
        let probes = self
            .health_probes_collection(ctx, &backend_ids, &mut config)
            .map_err(|e| {
                error!(error = %e, "Unable to generate health probes");
                BuildError::HealthProbes
            })?;

        debug!("Generating backend http settings");
        let settings = self
            .backend_http_settings_collection(ctx, &backend_ids, &istio_destinations, &probes, &mut config)
            .map_err(|e| {
                error!(error = %e, "Unable to generate backend http settings");
                BuildError::BackendHttpSettings
            })?;

        debug!("Generating backend address pools");
        let pools = self
            .backend_address_pools(ctx, &settings, &mut config)
            .map_err(|e| {
                error!(error = %e, "Unable to generate backend address pools");
                BuildError::BackendAddressPools
            })?;

        // Also creates redirect configurations for ssl-redirect ingresses,
        // which the routing rules attach to
        debug!("Generating listeners, ports and certificates");
        let listeners = self.listeners(ctx, &mut config).map_err(|e| {
            error!(error = %e, "Unable to generate frontend listeners");
            match e {
                StageError::NoFrontendIpConfiguration(_) => BuildError::FrontendIpConfiguration,
                _ => BuildError::Listeners,
            }
        })?;

        debug!("Generating request routing rules and path maps");
        self.request_routing_rules(ctx, &backend_ids, &settings, &pools, &listeners, &mut config)
            .map_err(|e| {
                error!(error = %e, "Unable to generate request routing rules");
                BuildError::RequestRoutingRules
            })?;

        if ctx.env.enable_brownfield_deployment {
            let existing = ExistingResources::new(&self.original, &ctx.prohibited_targets, None);
            let preserved = existing.preserved_resources();
            info!(
                listeners = preserved.listeners.len(),
                routing_rules = preserved.routing_rules.len(),
                "Preserving configuration for prohibited targets"
            );
            brownfield::merge_preserved(&mut config, preserved);
        }

        add_tags(&mut config);
        Ok(config)
    }

    fn post_build_validate(
        &self,
        ctx: &ConfigBuilderContext,
        gateway: &ApplicationGateway,
    ) -> Result<(), ValidationError> {
        validators::run_validators(
            POST_BUILD_VALIDATORS,
            self.recorder.as_ref(),
            &gateway.properties,
            &ctx.env,
            &ctx.ingress_list,
            &ctx.service_list,
        )
    }
}

/// Stamp the management tag onto `gateway`
pub fn add_tags(gateway: &mut ApplicationGateway) {
    gateway
        .tags
        .insert(MANAGED_BY_K8S_INGRESS.to_string(), version::management_tag_value());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appgw::model::{referenced_name, HttpListener, RuleType};
    use std::collections::BTreeSet;
    use crate::appgw::names;
    use crate::events::MockEventRecorder;
    use crate::fixtures;
    use crate::k8scontext::MemoryCache;

    fn quiet_recorder() -> Arc<MockEventRecorder> {
        let mut recorder = MockEventRecorder::new();
        recorder.expect_event().return_const(());
        Arc::new(recorder)
    }

    fn builder(cache: MemoryCache, original: ApplicationGateway) -> AppGwConfigBuilder {
        AppGwConfigBuilder::new(Arc::new(cache), fixtures::identifier(), original, quiet_recorder())
    }

    fn context(ingresses: Vec<Ingress>, env: EnvVariables) -> ConfigBuilderContext {
        ConfigBuilderContext::new(ingresses, vec![fixtures::service()], Vec::new(), env, Vec::new())
    }

    fn greenfield_gateway() -> ApplicationGateway {
        let mut gateway = fixtures::app_gateway();
        let props = &mut gateway.properties;
        props.http_listeners.clear();
        props.frontend_ports.clear();
        props.request_routing_rules.clear();
        props.url_path_maps.clear();
        gateway
    }

    #[test]
    fn test_build_generates_full_configuration() {
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), greenfield_gateway());
        let ctx = context(vec![fixtures::ingress()], EnvVariables::default());

        let gateway = builder.build(&ctx).expect("build succeeds");
        let props = &gateway.properties;

        assert_eq!(props.probes.len(), 3);
        // Default settings plus one per service port
        assert_eq!(props.backend_http_settings_collection.len(), 3);
        assert_eq!(props.backend_address_pools.len(), 3);
        // Both rules share bye.com:80
        assert_eq!(props.http_listeners.len(), 1);
        assert_eq!(props.frontend_ports.len(), 1);
        assert_eq!(props.request_routing_rules.len(), 1);
        assert_eq!(props.request_routing_rules[0].properties.rule_type, RuleType::PathBasedRouting);
        assert_eq!(props.url_path_maps[0].properties.path_rules.len(), 2);
        assert!(gateway.tags.contains_key(MANAGED_BY_K8S_INGRESS));

        builder
            .post_build_validate(&ctx, &gateway)
            .expect("generated configuration is valid");
    }

    #[test]
    fn test_build_is_idempotent() {
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), greenfield_gateway());
        let ctx = context(vec![fixtures::ingress_with_tls()], EnvVariables::default());

        let first = builder.build(&ctx).expect("first build succeeds");
        let second = builder.build(&ctx).expect("second build succeeds");
        assert_eq!(
            serde_json::to_string(&first).expect("serializes"),
            serde_json::to_string(&second).expect("serializes")
        );
    }

    #[test]
    fn test_build_without_ingresses_emits_defaults() {
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), greenfield_gateway());
        let ctx = context(Vec::new(), EnvVariables::default());

        let gateway = builder.build(&ctx).expect("build succeeds");
        let props = &gateway.properties;
        assert_eq!(props.probes.len(), 1);
        assert_eq!(props.probes[0].name, names::DEFAULT_PROBE_NAME);
        assert_eq!(props.http_listeners.len(), 1);
        let port_id = fixtures::identifier().frontend_port_id(&names::frontend_port_name(80));
        assert_eq!(
            props.http_listeners[0]
                .properties
                .frontend_port
                .as_ref()
                .and_then(|p| p.id.as_deref()),
            Some(port_id.as_str())
        );
        assert_eq!(props.request_routing_rules[0].properties.rule_type, RuleType::Basic);
    }

    #[test]
    fn test_build_fails_without_frontend_ip() {
        let mut original = greenfield_gateway();
        original.properties.frontend_ip_configurations.clear();
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), original);
        let ctx = context(vec![fixtures::ingress()], EnvVariables::default());

        assert_eq!(builder.build(&ctx), Err(BuildError::FrontendIpConfiguration));
    }

    #[test]
    fn test_settings_stage_failure_discards_configuration() {
        // No endpoints: the named target port of 443 cannot be resolved
        let mut cache = MemoryCache::new();
        cache.add_service(fixtures::service());
        let builder = builder(cache, greenfield_gateway());
        let ctx = context(vec![fixtures::ingress()], EnvVariables::default());

        assert_eq!(builder.build(&ctx), Err(BuildError::BackendHttpSettings));
    }

    #[test]
    fn test_brownfield_build_preserves_prohibited_configuration() {
        let env = EnvVariables {
            enable_brownfield_deployment: true,
            ..Default::default()
        };
        let ctx = ConfigBuilderContext::new(
            vec![fixtures::ingress()],
            vec![fixtures::service()],
            Vec::new(),
            env,
            fixtures::prohibited_targets(),
        );
        // bye.com/fox is prohibited, bye.com/hi is not
        assert_eq!(ctx.ingress_list[0].spec.as_ref().and_then(|s| s.rules.as_ref()).map(Vec::len), Some(1));

        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), fixtures::app_gateway());
        let gateway = builder.build(&ctx).expect("build succeeds");
        let listener_names: Vec<&str> = gateway
            .properties
            .http_listeners
            .iter()
            .map(|l| l.name.as_str())
            .collect();

        assert!(listener_names.contains(&fixtures::LISTENER_NAME_BASIC));
        assert!(listener_names.contains(&fixtures::LISTENER_PATH_BASED_1));
        assert!(listener_names.contains(&fixtures::LISTENER_PATH_BASED_2));
        assert!(!listener_names.contains(&fixtures::DEFAULT_LISTENER_NAME));
        assert!(gateway.properties.probes.iter().any(|p| p.name == "probe-existing"));
    }

    /// (port, host) of every listener, as the gateway would bind them
    fn listener_bindings(gateway: &ApplicationGateway) -> Vec<(i32, String)> {
        let props = &gateway.properties;
        props
            .http_listeners
            .iter()
            .map(|listener| {
                let port_name = referenced_name(&listener.properties.frontend_port).expect("frontend port");
                let port = props
                    .frontend_ports
                    .iter()
                    .find(|p| p.name == port_name)
                    .and_then(|p| p.properties.port)
                    .expect("known frontend port");
                (port, listener.properties.host_name.clone().unwrap_or_default())
            })
            .collect()
    }

    fn assert_unique_bindings(gateway: &ApplicationGateway) {
        let bindings = listener_bindings(gateway);
        let unique: BTreeSet<&(i32, String)> = bindings.iter().collect();
        assert_eq!(unique.len(), bindings.len(), "duplicate listener bindings: {:?}", bindings);
    }

    fn brownfield_context(prohibited: Vec<AzureIngressProhibitedTarget>) -> ConfigBuilderContext {
        let env = EnvVariables {
            enable_brownfield_deployment: true,
            ..Default::default()
        };
        ConfigBuilderContext::new(
            vec![fixtures::ingress()],
            vec![fixtures::service()],
            Vec::new(),
            env,
            prohibited,
        )
    }

    #[test]
    fn test_brownfield_build_binds_each_port_and_host_once() {
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), fixtures::app_gateway());
        let gateway = builder
            .build(&brownfield_context(fixtures::prohibited_targets()))
            .expect("build succeeds");

        assert_unique_bindings(&gateway);
        // The existing bye.com:80 listener keeps serving the host
        assert!(listener_bindings(&gateway).contains(&(80, fixtures::HOST.to_string())));
        let props = &gateway.properties;
        assert_eq!(props.request_routing_rules.len(), props.http_listeners.len());
        for rule in &props.request_routing_rules {
            let listener = referenced_name(&rule.properties.http_listener).expect("listener reference");
            assert!(props.http_listeners.iter().any(|l| l.name == listener));
        }
    }

    #[test]
    fn test_brownfield_build_under_universal_target_keeps_existing_listeners() {
        let mut prohibited = fixtures::prohibited_targets();
        prohibited.push(AzureIngressProhibitedTarget::from_spec("", Vec::new()));
        let ctx = brownfield_context(prohibited);
        let original = fixtures::app_gateway();
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), original.clone());

        let gateway = builder.build(&ctx).expect("build succeeds");
        assert_unique_bindings(&gateway);

        let names = |listeners: &[HttpListener]| -> BTreeSet<String> {
            listeners.iter().map(|l| l.name.clone()).collect()
        };
        assert_eq!(
            names(&gateway.properties.http_listeners),
            names(&original.properties.http_listeners)
        );
        let rules: BTreeSet<&str> = gateway
            .properties
            .request_routing_rules
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(
            rules,
            BTreeSet::from(["rr-basic", "rr-default", "rr-path-based-1", "rr-path-based-2"])
        );
        builder
            .post_build_validate(&ctx, &gateway)
            .expect("merged configuration is valid");
    }

    #[test]
    fn test_pre_build_validate_reports_missing_port() {
        let mut ingress = fixtures::ingress();
        if let Some(rules) = ingress.spec.as_mut().and_then(|s| s.rules.as_mut()) {
            rules[0] = fixtures::ingress_rule(
                fixtures::HOST,
                vec![fixtures::ingress_path(fixtures::URL_PATH, fixtures::port_number(8080))],
            );
        }
        let builder = builder(fixtures::cache_with_service_endpoints_and_pod(), greenfield_gateway());
        let ctx = context(vec![ingress], EnvVariables::default());

        assert!(builder.pre_build_validate(&ctx).is_err());
    }
}
