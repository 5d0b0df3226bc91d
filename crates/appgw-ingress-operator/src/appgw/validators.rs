//! Pre- and post-build validation
//!
//! Validators are plain functions collected in ordered registries. The
//! first failure wins and is returned verbatim so the caller can attribute
//! it in an event.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::EventType;
use kube::Resource;
use thiserror::Error;
use tracing::warn;

use super::backends::ingress_backend_ids;
use super::identifiers::ServicePortRef;
use super::model::{ApplicationGatewayProperties, SubResource};
use super::ports::{service_port_matches, service_ports};
use crate::environment::EnvVariables;
use crate::events::{reasons, EventRecorder};

/// Per-collection object limit of the gateway
pub const MAX_OBJECTS_PER_COLLECTION: usize = 100;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("ingress {ingress} references port {port} which service {service} does not expose")]
    ServicePortNotFound {
        ingress: String,
        service: String,
        port: String,
    },

    #[error("url path map {0} must have either a default redirect or a default backend pool and settings")]
    UrlPathMapDefault(String),

    #[error("path rule {path_rule} of url path map {path_map} must have either a redirect or a backend pool and settings")]
    PathRuleTarget { path_map: String, path_rule: String },

    #[error("{collection} has {count} entries, the gateway allows at most {limit}")]
    LimitExceeded {
        collection: &'static str,
        count: usize,
        limit: usize,
    },
}

pub type Validator = fn(
    &dyn EventRecorder,
    &ApplicationGatewayProperties,
    &EnvVariables,
    &[Ingress],
    &[Service],
) -> Result<(), ValidationError>;

pub struct NamedValidator {
    pub name: &'static str,
    pub check: Validator,
}

pub const PRE_BUILD_VALIDATORS: &[NamedValidator] = &[NamedValidator {
    name: "service-definition",
    check: validate_service_definition,
}];

pub const POST_BUILD_VALIDATORS: &[NamedValidator] = &[
    NamedValidator {
        name: "url-path-maps",
        check: validate_url_path_maps,
    },
    NamedValidator {
        name: "gateway-limits",
        check: validate_gateway_limits,
    },
];

/// Run `validators` in order, stopping at the first failure
pub fn run_validators(
    validators: &[NamedValidator],
    recorder: &dyn EventRecorder,
    config: &ApplicationGatewayProperties,
    env: &EnvVariables,
    ingresses: &[Ingress],
    services: &[Service],
) -> Result<(), ValidationError> {
    for validator in validators {
        if let Err(e) = (validator.check)(recorder, config, env, ingresses, services) {
            warn!(validator = validator.name, error = %e, "Validation failed");
            return Err(e);
        }
    }
    Ok(())
}

/// Every backend port referenced by an ingress must exist on its service
///
/// A service missing altogether only gets a warning event.
pub fn validate_service_definition(
    recorder: &dyn EventRecorder,
    _config: &ApplicationGatewayProperties,
    _env: &EnvVariables,
    ingresses: &[Ingress],
    services: &[Service],
) -> Result<(), ValidationError> {
    for ingress in ingresses {
        for backend in ingress_backend_ids(ingress) {
            let service = services.iter().find(|s| {
                s.metadata.namespace.as_deref() == Some(backend.service.namespace.as_str())
                    && s.metadata.name.as_deref() == Some(backend.service.name.as_str())
            });
            let Some(service) = service else {
                recorder.event(
                    &ingress.object_ref(&()),
                    EventType::Warning,
                    reasons::SERVICE_NOT_FOUND,
                    &format!("Unable to get the service [{}]", backend.service),
                );
                continue;
            };

            let exposed = service_ports(service).any(|port| match &backend.service_port {
                ServicePortRef::Number(number) => port.port == *number,
                ServicePortRef::Name(name) => service_port_matches(port, name),
            });
            if !exposed {
                let err = ValidationError::ServicePortNotFound {
                    ingress: backend.ingress.clone(),
                    service: backend.service.to_string(),
                    port: backend.service_port.to_string(),
                };
                recorder.event(
                    &ingress.object_ref(&()),
                    EventType::Warning,
                    reasons::VALIDATION_FAILED,
                    &err.to_string(),
                );
                return Err(err);
            }
        }
    }
    Ok(())
}

fn is_set(reference: &Option<SubResource>) -> bool {
    reference.as_ref().is_some_and(|r| r.id.is_some())
}

/// A route forwards to a pool+settings pair or redirects, never both or neither
fn has_single_target(
    pool: &Option<SubResource>,
    settings: &Option<SubResource>,
    redirect: &Option<SubResource>,
) -> bool {
    match (is_set(pool), is_set(settings), is_set(redirect)) {
        (true, true, false) | (false, false, true) => true,
        _ => false,
    }
}

pub fn validate_url_path_maps(
    _recorder: &dyn EventRecorder,
    config: &ApplicationGatewayProperties,
    _env: &EnvVariables,
    _ingresses: &[Ingress],
    _services: &[Service],
) -> Result<(), ValidationError> {
    for map in &config.url_path_maps {
        let props = &map.properties;
        if !has_single_target(
            &props.default_backend_address_pool,
            &props.default_backend_http_settings,
            &props.default_redirect_configuration,
        ) {
            return Err(ValidationError::UrlPathMapDefault(map.name.clone()));
        }
        for rule in &props.path_rules {
            let r = &rule.properties;
            if !has_single_target(&r.backend_address_pool, &r.backend_http_settings, &r.redirect_configuration) {
                return Err(ValidationError::PathRuleTarget {
                    path_map: map.name.clone(),
                    path_rule: rule.name.clone(),
                });
            }
        }
    }
    Ok(())
}

pub fn validate_gateway_limits(
    _recorder: &dyn EventRecorder,
    config: &ApplicationGatewayProperties,
    _env: &EnvVariables,
    _ingresses: &[Ingress],
    _services: &[Service],
) -> Result<(), ValidationError> {
    let counts = [
        ("frontendPorts", config.frontend_ports.len()),
        ("probes", config.probes.len()),
        ("backendAddressPools", config.backend_address_pools.len()),
        ("backendHttpSettingsCollection", config.backend_http_settings_collection.len()),
        ("httpListeners", config.http_listeners.len()),
        ("sslCertificates", config.ssl_certificates.len()),
        ("urlPathMaps", config.url_path_maps.len()),
        ("requestRoutingRules", config.request_routing_rules.len()),
        ("redirectConfigurations", config.redirect_configurations.len()),
    ];
    for (collection, count) in counts {
        if count > MAX_OBJECTS_PER_COLLECTION {
            return Err(ValidationError::LimitExceeded {
                collection,
                count,
                limit: MAX_OBJECTS_PER_COLLECTION,
            });
        }
    }
    Ok(())
}
