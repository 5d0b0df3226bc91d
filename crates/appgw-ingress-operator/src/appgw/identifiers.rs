//! Identifier value types and their generators
//!
//! Every gateway object name is derived from one of these keys. They are
//! plain owned values with structural equality and ordering, so they can key
//! `BTreeMap`s and the output of a build never depends on iteration order of
//! the cluster caches.

use std::fmt;

use k8s_openapi::api::networking::v1::{HTTPIngressPath, Ingress, IngressBackend, IngressRule};

use super::model::Protocol;
use crate::environment::EnvVariables;
use crate::istio::{Destination, HttpMatchRequest, VirtualService};

/// Namespace/name key into the service and endpoints caches
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceIdentifier {
    pub namespace: String,
    pub name: String,
}

impl ServiceIdentifier {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// `namespace-name`, the fragment used in object names
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Namespace/name key into the secrets cache
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SecretIdentifier {
    pub namespace: String,
    pub name: String,
}

impl SecretIdentifier {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for SecretIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Port of a backend service, as written on the ingress backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServicePortRef {
    Number(i32),
    Name(String),
}

impl fmt::Display for ServicePortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServicePortRef::Number(n) => write!(f, "{}", n),
            ServicePortRef::Name(name) => f.write_str(name),
        }
    }
}

/// One (ingress, rule, path, backend) combination
///
/// Refers back to its origin by ingress name and rule/path index. The
/// default backend of an ingress has neither index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendIdentifier {
    pub service: ServiceIdentifier,
    pub ingress: String,
    pub rule_index: Option<usize>,
    pub path_index: Option<usize>,
    pub host: String,
    pub path: Option<String>,
    pub service_port: ServicePortRef,
}

impl BackendIdentifier {
    pub fn service_key(&self) -> &ServiceIdentifier {
        &self.service
    }

    pub fn is_default_backend(&self) -> bool {
        self.rule_index.is_none()
    }
}

/// Frontend port and hostname of a listener
///
/// Two routes resolving to the same pair share one listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerIdentifier {
    pub frontend_port: i32,
    pub host_name: String,
}

impl ListenerIdentifier {
    pub fn new(frontend_port: i32, host_name: impl Into<String>) -> Self {
        Self {
            frontend_port,
            host_name: host_name.into(),
        }
    }
}

impl fmt::Display for ListenerIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host_name.is_empty() {
            write!(f, "*:{}", self.frontend_port)
        } else {
            write!(f, "{}:{}", self.host_name, self.frontend_port)
        }
    }
}

/// One Istio route destination
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IstioDestinationIdentifier {
    pub service: ServiceIdentifier,
    pub virtual_service: String,
    pub port: Option<ServicePortRef>,
}

impl IstioDestinationIdentifier {
    pub fn service_key(&self) -> &ServiceIdentifier {
        &self.service
    }
}

/// One Istio HTTP route match together with the destinations it routes to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IstioMatchIdentifier {
    pub namespace: String,
    pub virtual_service: String,
    pub rule_index: usize,
    pub match_index: usize,
    pub destinations: Vec<IstioDestinationIdentifier>,
    pub gateways: Vec<String>,
}

/// Key for the backend at `backend` of `ingress`
///
/// Returns `None` for resource backends, which the gateway cannot route to.
pub fn generate_backend_id(
    ingress: &Ingress,
    rule: Option<(usize, &IngressRule)>,
    path: Option<(usize, &HTTPIngressPath)>,
    backend: &IngressBackend,
) -> Option<BackendIdentifier> {
    let service = backend.service.as_ref()?;
    let port = service.port.as_ref()?;
    let service_port = match (port.number, port.name.as_deref()) {
        (Some(number), _) => ServicePortRef::Number(number),
        (None, Some(name)) if !name.is_empty() => ServicePortRef::Name(name.to_string()),
        _ => return None,
    };

    Some(BackendIdentifier {
        service: ServiceIdentifier::new(
            ingress.metadata.namespace.clone().unwrap_or_default(),
            service.name.clone(),
        ),
        ingress: ingress.metadata.name.clone().unwrap_or_default(),
        rule_index: rule.map(|(i, _)| i),
        path_index: path.map(|(i, _)| i),
        host: rule
            .and_then(|(_, r)| r.host.clone())
            .unwrap_or_default(),
        path: path.and_then(|(_, p)| p.path.clone()),
        service_port,
    })
}

/// Listener for `rule` served over `protocol`
///
/// HTTP defaults to port 80 and HTTPS to 443; `override_port` always wins.
pub fn generate_listener_id(
    rule: &IngressRule,
    protocol: Protocol,
    override_port: Option<i32>,
) -> ListenerIdentifier {
    let default_port = match protocol {
        Protocol::Http => 80,
        Protocol::Https => 443,
    };
    ListenerIdentifier {
        frontend_port: override_port.unwrap_or(default_port),
        host_name: rule.host.clone().unwrap_or_default(),
    }
}

pub fn generate_istio_destination_id(
    virtual_service: &VirtualService,
    destination: &Destination,
) -> IstioDestinationIdentifier {
    let port = destination.port.as_ref().and_then(|p| match (p.number, &p.name) {
        (Some(number), _) => i32::try_from(number).ok().map(ServicePortRef::Number),
        (None, Some(name)) if !name.is_empty() => Some(ServicePortRef::Name(name.clone())),
        _ => None,
    });
    IstioDestinationIdentifier {
        service: ServiceIdentifier::new(
            virtual_service.metadata.namespace.clone().unwrap_or_default(),
            destination.service_name(),
        ),
        virtual_service: virtual_service.metadata.name.clone().unwrap_or_default(),
        port,
    }
}

pub fn generate_istio_match_id(
    virtual_service: &VirtualService,
    rule_index: usize,
    match_index: usize,
    request_match: &HttpMatchRequest,
    destinations: Vec<IstioDestinationIdentifier>,
) -> IstioMatchIdentifier {
    IstioMatchIdentifier {
        namespace: virtual_service.metadata.namespace.clone().unwrap_or_default(),
        virtual_service: virtual_service.metadata.name.clone().unwrap_or_default(),
        rule_index,
        match_index,
        destinations,
        gateways: request_match.gateways.clone(),
    }
}

/// Builds ARM resource IDs for objects inside one gateway
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Identifier {
    pub subscription_id: String,
    pub resource_group_name: String,
    pub app_gateway_name: String,
}

impl Identifier {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group_name: impl Into<String>,
        app_gateway_name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group_name: resource_group_name.into(),
            app_gateway_name: app_gateway_name.into(),
        }
    }

    pub fn from_env(env: &EnvVariables) -> Self {
        Self::new(
            env.subscription_id.clone(),
            env.resource_group_name.clone(),
            env.app_gateway_name.clone(),
        )
    }

    pub fn gateway_id(&self) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/applicationGateways/{}",
            self.subscription_id, self.resource_group_name, self.app_gateway_name
        )
    }

    fn child_id(&self, collection: &str, name: &str) -> String {
        format!("{}/{}/{}", self.gateway_id(), collection, name)
    }

    pub fn probe_id(&self, name: &str) -> String {
        self.child_id("probes", name)
    }

    pub fn http_settings_id(&self, name: &str) -> String {
        self.child_id("backendHttpSettingsCollection", name)
    }

    pub fn address_pool_id(&self, name: &str) -> String {
        self.child_id("backendAddressPools", name)
    }

    pub fn frontend_port_id(&self, name: &str) -> String {
        self.child_id("frontendPorts", name)
    }

    pub fn frontend_ip_configuration_id(&self, name: &str) -> String {
        self.child_id("frontendIPConfigurations", name)
    }

    pub fn listener_id(&self, name: &str) -> String {
        self.child_id("httpListeners", name)
    }

    pub fn ssl_certificate_id(&self, name: &str) -> String {
        self.child_id("sslCertificates", name)
    }

    pub fn url_path_map_id(&self, name: &str) -> String {
        self.child_id("urlPathMaps", name)
    }

    pub fn path_rule_id(&self, path_map: &str, name: &str) -> String {
        format!("{}/pathRules/{}", self.url_path_map_id(path_map), name)
    }

    pub fn request_routing_rule_id(&self, name: &str) -> String {
        self.child_id("requestRoutingRules", name)
    }

    pub fn redirect_configuration_id(&self, name: &str) -> String {
        self.child_id("redirectConfigurations", name)
    }
}
