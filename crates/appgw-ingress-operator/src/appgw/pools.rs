//! Backend address pools stage

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Endpoints;
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, warn};

use super::builder::{AppGwConfigBuilder, ConfigBuilderContext, StageError};
use super::identifiers::{BackendIdentifier, Identifier, IstioDestinationIdentifier};
use super::model::{
    sort_by_name, ApplicationGateway, BackendAddress, BackendAddressPool, BackendAddressPoolProperties,
};
use super::names;
use super::settings::{BackendSettings, SettingsBinding};
use crate::events::reasons;

/// Pool serving each bound backend; the rest use the default pool
#[derive(Debug, Default)]
pub(crate) struct BackendPools {
    pub by_backend: BTreeMap<BackendIdentifier, String>,
    pub istio_by_destination: BTreeMap<IstioDestinationIdentifier, String>,
    pub default_pool_id: String,
}

impl BackendPools {
    pub fn pool_id_for(&self, backend: &BackendIdentifier) -> &str {
        self.by_backend
            .get(backend)
            .map(String::as_str)
            .unwrap_or(&self.default_pool_id)
    }

    pub fn istio_pool_id_for(&self, destination: &IstioDestinationIdentifier) -> &str {
        self.istio_by_destination
            .get(destination)
            .map(String::as_str)
            .unwrap_or(&self.default_pool_id)
    }
}

pub fn default_backend_address_pool(identifier: &Identifier) -> BackendAddressPool {
    BackendAddressPool::new(
        names::DEFAULT_ADDRESS_POOL_NAME,
        identifier.address_pool_id(names::DEFAULT_ADDRESS_POOL_NAME),
        BackendAddressPoolProperties::default(),
    )
}

/// Addresses of the endpoint subsets exposing `port`
fn addresses_for_port(endpoints: &Endpoints, port: i32) -> Option<BTreeSet<BackendAddress>> {
    let mut found = false;
    let mut addresses = BTreeSet::new();
    for subset in endpoints.subsets.iter().flatten() {
        if !subset.ports.iter().flatten().any(|p| p.port == port) {
            continue;
        }
        found = true;
        for address in subset.addresses.iter().flatten() {
            addresses.insert(BackendAddress {
                fqdn: None,
                ip_address: Some(address.ip.clone()),
            });
        }
    }
    found.then_some(addresses)
}

impl AppGwConfigBuilder {
    /// One pool per resolved (service, port); takes the bindings of the settings stage
    pub(crate) fn backend_address_pools(
        &self,
        ctx: &ConfigBuilderContext,
        settings: &BackendSettings,
        config: &mut ApplicationGateway,
    ) -> Result<BackendPools, StageError> {
        let default = default_backend_address_pool(&self.identifier);
        let mut result = BackendPools {
            default_pool_id: default.id_or_name().to_string(),
            ..Default::default()
        };
        let mut pools: BTreeMap<String, BackendAddressPool> = BTreeMap::new();
        pools.insert(default.name.clone(), default);

        for (backend, binding) in &settings.bindings {
            let Some(pool) = self.pool_for_binding(binding) else {
                let message = format!(
                    "Endpoints of service [{}] do not expose port [{}]",
                    binding.service, binding.ports.backend_port
                );
                warn!(ingress = %backend.ingress, "{}", message);
                if let Some(ingress) = ctx.find_ingress(&backend.service.namespace, &backend.ingress) {
                    self.recorder.event(
                        &ingress.object_ref(&()),
                        EventType::Warning,
                        reasons::ENDPOINTS_PORT_MISMATCH,
                        &message,
                    );
                }
                continue;
            };
            result
                .by_backend
                .insert(backend.clone(), pool.id_or_name().to_string());
            pools.entry(pool.name.clone()).or_insert(pool);
        }

        for (destination, binding) in &settings.istio_bindings {
            let Some(pool) = self.pool_for_binding(binding) else {
                warn!(
                    service = %binding.service,
                    virtual_service = %destination.virtual_service,
                    "Endpoints do not expose the destination port"
                );
                continue;
            };
            result
                .istio_by_destination
                .insert(destination.clone(), pool.id_or_name().to_string());
            pools.entry(pool.name.clone()).or_insert(pool);
        }

        let mut pools: Vec<BackendAddressPool> = pools.into_values().collect();
        sort_by_name(&mut pools);
        debug!(pools = pools.len(), "Generated backend address pools");
        config.properties.backend_address_pools = pools;
        Ok(result)
    }

    fn pool_for_binding(&self, binding: &SettingsBinding) -> Option<BackendAddressPool> {
        let endpoints = match self.cache.get_endpoints_by_service(&binding.service) {
            Ok(Some(endpoints)) => endpoints,
            Ok(None) => return None,
            Err(e) => {
                warn!(service = %binding.service, error = %e, "Could not fetch endpoints from cache");
                return None;
            }
        };
        let addresses = addresses_for_port(&endpoints, binding.ports.backend_port)?;
        let name = names::address_pool_name(&binding.service, &binding.service_port, binding.ports.backend_port);
        Some(BackendAddressPool::new(
            name.clone(),
            self.identifier.address_pool_id(&name),
            BackendAddressPoolProperties {
                backend_addresses: addresses.into_iter().collect(),
                ..Default::default()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appgw::identifiers::ServicePortRef;
    use crate::appgw::ports::ServiceBackendPortPair;
    use crate::environment::EnvVariables;
    use crate::events::MockEventRecorder;
    use crate::fixtures;
    use crate::k8scontext::MemoryCache;
    use std::sync::Arc;

    fn binding(backend_port: i32) -> SettingsBinding {
        SettingsBinding {
            service: fixtures::backend_id(ServicePortRef::Number(80)).service,
            service_port: "80".to_string(),
            ports: ServiceBackendPortPair {
                service_port: 80,
                backend_port,
            },
            settings_id: "settings".to_string(),
        }
    }

    fn run(cache: MemoryCache, recorder: MockEventRecorder, backend_port: i32) -> (ApplicationGateway, BackendPools) {
        let builder = AppGwConfigBuilder::new(
            Arc::new(cache),
            fixtures::identifier(),
            fixtures::app_gateway(),
            Arc::new(recorder),
        );
        let ctx = ConfigBuilderContext::new(
            vec![fixtures::ingress()],
            vec![fixtures::service()],
            Vec::new(),
            EnvVariables::default(),
            Vec::new(),
        );
        let mut settings = BackendSettings::default();
        settings
            .bindings
            .insert(fixtures::backend_id(ServicePortRef::Number(80)), binding(backend_port));
        let mut config = fixtures::app_gateway();
        let pools = builder
            .backend_address_pools(&ctx, &settings, &mut config)
            .expect("pools stage succeeds");
        (config, pools)
    }

    #[test]
    fn test_pool_from_endpoints() {
        let (config, pools) = run(
            fixtures::cache_with_service_endpoints_and_pod(),
            MockEventRecorder::new(),
            fixtures::CONTAINER_PORT,
        );
        let generated = config
            .properties
            .backend_address_pools
            .iter()
            .find(|p| p.name != names::DEFAULT_ADDRESS_POOL_NAME)
            .expect("generated pool");
        assert_eq!(
            generated.properties.backend_addresses,
            vec![BackendAddress {
                fqdn: None,
                ip_address: Some(fixtures::ENDPOINT_IP.to_string())
            }]
        );
        assert_eq!(
            pools.pool_id_for(&fixtures::backend_id(ServicePortRef::Number(80))),
            generated.id_or_name()
        );
    }

    #[test]
    fn test_port_mismatch_falls_back_to_default_pool() {
        let mut recorder = MockEventRecorder::new();
        recorder
            .expect_event()
            .withf(|_, _, reason, _| reason == reasons::ENDPOINTS_PORT_MISMATCH)
            .times(1)
            .return_const(());
        let (config, pools) = run(fixtures::cache_with_service_endpoints_and_pod(), recorder, 1234);

        assert_eq!(config.properties.backend_address_pools.len(), 1);
        assert_eq!(
            pools.pool_id_for(&fixtures::backend_id(ServicePortRef::Number(80))),
            pools.default_pool_id
        );
    }
}
