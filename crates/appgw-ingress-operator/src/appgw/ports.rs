//! Port resolution
//!
//! Maps the port a route references (on the Service) to the port the pods
//! actually listen on. Named target ports are resolved through the cached
//! Endpoints of the service.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{Endpoints, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, error};

use super::identifiers::{BackendIdentifier, IstioDestinationIdentifier, ServiceIdentifier, ServicePortRef};
use crate::k8scontext::ClusterCache;

/// A service port and the backend port it forwards to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceBackendPortPair {
    pub service_port: i32,
    pub backend_port: i32,
}

/// Read-through port resolution against the endpoints cache
pub struct PortResolver<'a> {
    cache: &'a dyn ClusterCache,
}

impl<'a> PortResolver<'a> {
    pub fn new(cache: &'a dyn ClusterCache) -> Self {
        Self { cache }
    }

    /// Every endpoint port named `port_name` for the backend's service
    ///
    /// A missing Endpoints object and a failed lookup both yield the empty
    /// set. The failure is logged.
    pub fn resolve_port_name(&self, port_name: &str, backend: &BackendIdentifier) -> BTreeSet<i32> {
        self.resolve_for_service(port_name, backend.service_key())
    }

    /// Same as [`resolve_port_name`](Self::resolve_port_name) for an Istio destination
    pub fn resolve_istio_port_name(
        &self,
        port_name: &str,
        destination: &IstioDestinationIdentifier,
    ) -> BTreeSet<i32> {
        self.resolve_for_service(port_name, destination.service_key())
    }

    fn resolve_for_service(&self, port_name: &str, service: &ServiceIdentifier) -> BTreeSet<i32> {
        match self.cache.get_endpoints_by_service(service) {
            Ok(Some(endpoints)) => endpoint_ports_named(&endpoints, port_name),
            Ok(None) => {
                debug!(service = %service, port_name, "No endpoints cached for service");
                BTreeSet::new()
            }
            Err(e) => {
                error!(service = %service, error = %e, "Could not fetch endpoints from cache");
                BTreeSet::new()
            }
        }
    }

    /// Service/backend port pairs a route reference binds to
    ///
    /// Only TCP ports are considered. A service port matches when its number,
    /// its name, or its target port equals the reference. The target port
    /// then decides the backend port: absent means the service port itself,
    /// a number is taken as is, and a name goes through `resolve_name`.
    pub fn resolve_service_ports(
        &self,
        service: &Service,
        port_ref: &ServicePortRef,
        resolve_name: impl Fn(&str) -> BTreeSet<i32>,
    ) -> BTreeSet<ServiceBackendPortPair> {
        let reference = port_ref.to_string();
        let mut pairs = BTreeSet::new();

        for port in service_ports(service) {
            if !is_tcp(port) || !service_port_matches(port, &reference) {
                continue;
            }
            match &port.target_port {
                None => {
                    pairs.insert(ServiceBackendPortPair {
                        service_port: port.port,
                        backend_port: port.port,
                    });
                }
                Some(IntOrString::Int(target)) => {
                    pairs.insert(ServiceBackendPortPair {
                        service_port: port.port,
                        backend_port: *target,
                    });
                }
                Some(IntOrString::String(name)) => {
                    for backend_port in resolve_name(name) {
                        pairs.insert(ServiceBackendPortPair {
                            service_port: port.port,
                            backend_port,
                        });
                    }
                }
            }
        }
        pairs
    }

    /// Port pairs for an ingress backend
    pub fn resolve_backend(&self, service: &Service, backend: &BackendIdentifier) -> BTreeSet<ServiceBackendPortPair> {
        self.resolve_service_ports(service, &backend.service_port, |name| {
            self.resolve_port_name(name, backend)
        })
    }

    /// Port pairs for an Istio destination
    ///
    /// A destination without a port matches nothing.
    pub fn resolve_istio_destination(
        &self,
        service: &Service,
        destination: &IstioDestinationIdentifier,
    ) -> BTreeSet<ServiceBackendPortPair> {
        let Some(port_ref) = &destination.port else {
            return BTreeSet::new();
        };
        self.resolve_service_ports(service, port_ref, |name| {
            self.resolve_istio_port_name(name, destination)
        })
    }
}

/// Ports named `port_name` across every subset of `endpoints`
pub fn endpoint_ports_named(endpoints: &Endpoints, port_name: &str) -> BTreeSet<i32> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.ports.iter().flatten())
        .filter(|port| port.name.as_deref().unwrap_or_default() == port_name)
        .map(|port| port.port)
        .collect()
}

pub(crate) fn service_ports(service: &Service) -> impl Iterator<Item = &ServicePort> {
    service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
}

fn is_tcp(port: &ServicePort) -> bool {
    matches!(port.protocol.as_deref(), None | Some("TCP"))
}

/// True when `reference` names this port by number, name or target port
pub(crate) fn service_port_matches(port: &ServicePort, reference: &str) -> bool {
    if port.port.to_string() == reference {
        return true;
    }
    if port.name.as_deref().is_some_and(|name| name == reference) {
        return true;
    }
    match &port.target_port {
        Some(IntOrString::Int(target)) => target.to_string() == reference,
        Some(IntOrString::String(target)) => target == reference,
        None => false,
    }
}
