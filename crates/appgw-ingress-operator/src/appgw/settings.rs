//! Backend HTTP settings stage

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{error, warn};

use super::annotations::{self, AnnotationError};
use super::builder::{AppGwConfigBuilder, ConfigBuilderContext, StageError};
use super::identifiers::{BackendIdentifier, Identifier, IstioDestinationIdentifier, ServiceIdentifier};
use super::model::{
    resource_ref, sort_by_name, ApplicationGateway, BackendHttpSettings, BackendHttpSettingsProperties,
    CookieBasedAffinity, Protocol,
};
use super::names;
use super::ports::{PortResolver, ServiceBackendPortPair};
use super::probes::HealthProbes;
use crate::events::reasons;

pub const DEFAULT_REQUEST_TIMEOUT: i32 = 30;

/// Resolved port pair and settings object of one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SettingsBinding {
    pub service: ServiceIdentifier,
    pub service_port: String,
    pub ports: ServiceBackendPortPair,
    pub settings_id: String,
}

/// Output of the settings stage, consumed by the pools and rules stages
#[derive(Debug, Default)]
pub(crate) struct BackendSettings {
    pub bindings: BTreeMap<BackendIdentifier, SettingsBinding>,
    pub istio_bindings: BTreeMap<IstioDestinationIdentifier, SettingsBinding>,
    pub default_settings_id: String,
}

/// Settings used by routes without a resolvable backend
pub fn default_backend_http_settings(identifier: &Identifier) -> BackendHttpSettings {
    BackendHttpSettings::new(
        names::DEFAULT_HTTP_SETTINGS_NAME,
        identifier.http_settings_id(names::DEFAULT_HTTP_SETTINGS_NAME),
        BackendHttpSettingsProperties {
            port: Some(80),
            protocol: Protocol::Http,
            cookie_based_affinity: CookieBasedAffinity::Disabled,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            probe: Some(resource_ref(identifier.probe_id(names::DEFAULT_PROBE_NAME))),
            pick_host_name_from_backend_address: Some(false),
            ..Default::default()
        },
    )
}

impl AppGwConfigBuilder {
    /// Binds every backend to exactly one service/backend port pair
    ///
    /// Fails when any backend resolves to no port or to more than one.
    pub(crate) fn backend_http_settings_collection(
        &self,
        ctx: &ConfigBuilderContext,
        backend_ids: &BTreeSet<BackendIdentifier>,
        istio_destinations: &BTreeSet<IstioDestinationIdentifier>,
        probes: &HealthProbes,
        config: &mut ApplicationGateway,
    ) -> Result<BackendSettings, StageError> {
        let resolver = PortResolver::new(self.cache.as_ref());
        let default = default_backend_http_settings(&self.identifier);
        let mut result = BackendSettings {
            default_settings_id: default.id_or_name().to_string(),
            ..Default::default()
        };
        let mut settings: BTreeMap<String, BackendHttpSettings> = BTreeMap::new();
        settings.insert(default.name.clone(), default);
        let mut unresolved: Vec<String> = Vec::new();

        for backend in backend_ids {
            let ingress = ctx.find_ingress(&backend.service.namespace, &backend.ingress);
            let Some(service) = self.cache.get_service(backend.service_key()) else {
                // Filtered upstream; a concurrent delete can still race us
                unresolved.push(backend.service.to_string());
                continue;
            };

            let pairs = resolver.resolve_backend(&service, backend);
            let pair = match single_pair(&pairs) {
                Ok(pair) => pair,
                Err(problem) => {
                    let message = format!(
                        "{} for service [{}] port [{}]",
                        problem, backend.service, backend.service_port
                    );
                    error!(ingress = %backend.ingress, "{}", message);
                    if let Some(ingress) = ingress {
                        self.recorder.event(
                            &ingress.object_ref(&()),
                            EventType::Warning,
                            reasons::PORT_RESOLUTION_ERROR,
                            &message,
                        );
                    }
                    unresolved.push(format!("{}:{}", backend.service, backend.service_port));
                    continue;
                }
            };

            let service_port = backend.service_port.to_string();
            let name = names::http_settings_name(&backend.service, &service_port, pair.backend_port, &backend.ingress);
            let mut props = BackendHttpSettingsProperties {
                port: Some(pair.backend_port),
                protocol: Protocol::Http,
                cookie_based_affinity: CookieBasedAffinity::Disabled,
                request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
                probe: Some(resource_ref(probes.probe_id_for(backend))),
                ..Default::default()
            };
            if let Some(ingress) = ingress {
                apply_annotations(&mut props, ingress);
            }
            let object = BackendHttpSettings::new(name.clone(), self.identifier.http_settings_id(&name), props);

            result.bindings.insert(
                backend.clone(),
                SettingsBinding {
                    service: backend.service.clone(),
                    service_port,
                    ports: pair,
                    settings_id: object.id_or_name().to_string(),
                },
            );
            settings.entry(name).or_insert(object);
        }

        for destination in istio_destinations {
            let Some(service) = self.cache.get_service(destination.service_key()) else {
                unresolved.push(destination.service.to_string());
                continue;
            };
            let pairs = resolver.resolve_istio_destination(&service, destination);
            let pair = match single_pair(&pairs) {
                Ok(pair) => pair,
                Err(problem) => {
                    error!(
                        service = %destination.service,
                        virtual_service = %destination.virtual_service,
                        "{}", problem
                    );
                    unresolved.push(destination.service.to_string());
                    continue;
                }
            };

            let service_port = destination
                .port
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default();
            let name = names::http_settings_name(
                &destination.service,
                &service_port,
                pair.backend_port,
                &destination.virtual_service,
            );
            let object = BackendHttpSettings::new(
                name.clone(),
                self.identifier.http_settings_id(&name),
                BackendHttpSettingsProperties {
                    port: Some(pair.backend_port),
                    protocol: Protocol::Http,
                    cookie_based_affinity: CookieBasedAffinity::Disabled,
                    request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
                    probe: Some(resource_ref(probes.default_probe_id.clone())),
                    ..Default::default()
                },
            );
            result.istio_bindings.insert(
                destination.clone(),
                SettingsBinding {
                    service: destination.service.clone(),
                    service_port,
                    ports: pair,
                    settings_id: object.id_or_name().to_string(),
                },
            );
            settings.entry(name).or_insert(object);
        }

        if !unresolved.is_empty() {
            return Err(StageError::UnresolvedBackendPorts(unresolved.join(", ")));
        }

        let mut settings: Vec<BackendHttpSettings> = settings.into_values().collect();
        sort_by_name(&mut settings);
        config.properties.backend_http_settings_collection = settings;
        Ok(result)
    }
}

fn single_pair(pairs: &BTreeSet<ServiceBackendPortPair>) -> Result<ServiceBackendPortPair, &'static str> {
    let mut iter = pairs.iter();
    match (iter.next(), iter.next()) {
        (Some(pair), None) => Ok(*pair),
        (None, _) => Err("Unable to resolve any backend port"),
        (Some(_), Some(_)) => Err("More than one backend port resolved"),
    }
}

/// Apply per-ingress overrides; malformed values are logged and ignored
fn apply_annotations(props: &mut BackendHttpSettingsProperties, ingress: &Ingress) {
    if let Some(prefix) = accept(annotations::backend_path_prefix(ingress)) {
        props.path = Some(prefix);
    }
    if let Some(host) = accept(annotations::backend_hostname(ingress)) {
        props.host_name = Some(host);
    }
    if let Some(protocol) = accept(annotations::backend_protocol(ingress)) {
        props.protocol = protocol;
    }
    if let Some(affinity) = accept(annotations::cookie_based_affinity(ingress)) {
        props.cookie_based_affinity = affinity;
    }
    if let Some(timeout) = accept(annotations::request_timeout(ingress)) {
        props.request_timeout = Some(timeout);
    }
}

fn accept<T>(value: Result<T, AnnotationError>) -> Option<T> {
    match value {
        Ok(v) => Some(v),
        Err(AnnotationError::Missing { .. }) => None,
        Err(e) => {
            warn!(error = %e, "Ignoring annotation");
            None
        }
    }
}
