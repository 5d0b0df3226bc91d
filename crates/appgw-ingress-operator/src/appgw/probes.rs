//! Health probes stage

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::{HTTPGetAction, Probe as K8sProbe, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::debug;

use super::annotations;
use super::builder::{AppGwConfigBuilder, ConfigBuilderContext, StageError};
use super::identifiers::{BackendIdentifier, Identifier};
use super::model::{sort_by_name, ApplicationGateway, Probe, ProbeProperties, Protocol};
use super::names;
use super::ports::{service_port_matches, service_ports, PortResolver};

pub const DEFAULT_PROBE_INTERVAL: i32 = 30;
pub const DEFAULT_PROBE_TIMEOUT: i32 = 30;
pub const DEFAULT_PROBE_UNHEALTHY_THRESHOLD: i32 = 3;

/// Probe serving each backend (backends without one use the default probe)
#[derive(Debug, Default)]
pub(crate) struct HealthProbes {
    pub by_backend: BTreeMap<BackendIdentifier, String>,
    pub default_probe_id: String,
}

impl HealthProbes {
    pub fn probe_id_for(&self, backend: &BackendIdentifier) -> &str {
        self.by_backend
            .get(backend)
            .map(String::as_str)
            .unwrap_or(&self.default_probe_id)
    }
}

fn default_probe_properties() -> ProbeProperties {
    ProbeProperties {
        protocol: Protocol::Http,
        host: Some("localhost".to_string()),
        path: Some("/".to_string()),
        interval: Some(DEFAULT_PROBE_INTERVAL),
        timeout: Some(DEFAULT_PROBE_TIMEOUT),
        unhealthy_threshold: Some(DEFAULT_PROBE_UNHEALTHY_THRESHOLD),
        ..Default::default()
    }
}

/// Probe used by backends for which nothing better is known
pub fn default_probe(identifier: &Identifier) -> Probe {
    Probe::new(
        names::DEFAULT_PROBE_NAME,
        identifier.probe_id(names::DEFAULT_PROBE_NAME),
        default_probe_properties(),
    )
}

impl AppGwConfigBuilder {
    /// Emits the default probe plus one probe per backend whose service is known
    pub(crate) fn health_probes_collection(
        &self,
        ctx: &ConfigBuilderContext,
        backend_ids: &BTreeSet<BackendIdentifier>,
        config: &mut ApplicationGateway,
    ) -> Result<HealthProbes, StageError> {
        let default = default_probe(&self.identifier);
        let mut health = HealthProbes {
            by_backend: BTreeMap::new(),
            default_probe_id: default.id_or_name().to_string(),
        };
        let mut probes: BTreeMap<String, Probe> = BTreeMap::new();
        probes.insert(default.name.clone(), default);

        for backend in backend_ids {
            let Some(probe) = self.generate_health_probe(ctx, backend) else {
                debug!(service = %backend.service, "Using default probe for backend");
                continue;
            };
            health
                .by_backend
                .insert(backend.clone(), probe.id_or_name().to_string());
            probes.entry(probe.name.clone()).or_insert(probe);
        }

        let mut probes: Vec<Probe> = probes.into_values().collect();
        sort_by_name(&mut probes);
        debug!(probes = probes.len(), "Generated health probes");
        config.properties.probes = probes;
        Ok(health)
    }

    fn generate_health_probe(&self, ctx: &ConfigBuilderContext, backend: &BackendIdentifier) -> Option<Probe> {
        let service = self.cache.get_service(backend.service_key())?;
        let ingress = ctx.find_ingress(&backend.service.namespace, &backend.ingress);

        let mut props = default_probe_properties();
        if !backend.host.is_empty() {
            props.host = Some(backend.host.clone());
        }
        match ingress.map(annotations::backend_path_prefix) {
            Some(Ok(prefix)) => props.path = Some(prefix),
            _ => {
                if let Some(path) = backend.path.as_deref().filter(|p| !p.is_empty()) {
                    props.path = Some(path.to_string());
                }
            }
        }
        if let Some(Ok(protocol)) = ingress.map(annotations::backend_protocol) {
            props.protocol = protocol;
        }

        if let Some(k8s_probe) = self.probe_for_service_container(&service, backend) {
            if let Some(http_get) = &k8s_probe.http_get {
                apply_http_get(&mut props, http_get);
            }
            if let Some(period) = k8s_probe.period_seconds.filter(|v| *v > 0) {
                props.interval = Some(period);
            }
            if let Some(timeout) = k8s_probe.timeout_seconds.filter(|v| *v > 0) {
                props.timeout = Some(timeout);
            }
            if let Some(threshold) = k8s_probe.failure_threshold.filter(|v| *v > 0) {
                props.unhealthy_threshold = Some(threshold);
            }
        }

        // Probe paths cannot carry wildcards
        if let Some(path) = props.path.as_mut() {
            let trimmed = path.trim_end_matches('*');
            *path = if trimmed.is_empty() {
                "/".to_string()
            } else {
                trimmed.to_string()
            };
        }

        let name = names::probe_name(backend);
        Some(Probe::new(name.clone(), self.identifier.probe_id(&name), props))
    }

    /// Readiness (else liveness) HTTP probe of the container serving the backend
    fn probe_for_service_container(&self, service: &Service, backend: &BackendIdentifier) -> Option<K8sProbe> {
        let resolver = PortResolver::new(self.cache.as_ref());
        let backend_ports: BTreeSet<i32> = resolver
            .resolve_backend(service, backend)
            .into_iter()
            .map(|pair| pair.backend_port)
            .collect();
        let reference = backend.service_port.to_string();
        let target_names: BTreeSet<&str> = service_ports(service)
            .filter(|port| service_port_matches(port, &reference))
            .filter_map(|port| match &port.target_port {
                Some(IntOrString::String(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect();

        for pod in self.cache.list_pods_by_service_selector(service) {
            let Some(spec) = pod.spec.as_ref() else {
                continue;
            };
            for container in &spec.containers {
                let serves_backend = container.ports.iter().flatten().any(|port| {
                    backend_ports.contains(&port.container_port)
                        || port
                            .name
                            .as_deref()
                            .is_some_and(|name| target_names.contains(name))
                });
                if !serves_backend {
                    continue;
                }
                let http_probe = [&container.readiness_probe, &container.liveness_probe]
                    .into_iter()
                    .flatten()
                    .find(|probe| probe.http_get.is_some());
                if let Some(probe) = http_probe {
                    return Some(probe.clone());
                }
            }
        }
        None
    }
}

fn apply_http_get(props: &mut ProbeProperties, http_get: &HTTPGetAction) {
    if let Some(host) = http_get.host.as_deref().filter(|h| !h.is_empty()) {
        props.host = Some(host.to_string());
    }
    if let Some(path) = http_get.path.as_deref().filter(|p| !p.is_empty()) {
        props.path = Some(path.to_string());
    }
    if http_get.scheme.as_deref() == Some("HTTPS") {
        props.protocol = Protocol::Https;
    }
}
