//! Deterministic names for generated gateway objects
//!
//! Names are pure functions of identifiers. Anything longer than the
//! platform limit is clamped by keeping its head and tail, which stays
//! stable across runs.

use super::identifiers::{BackendIdentifier, ListenerIdentifier, SecretIdentifier, ServiceIdentifier};

/// Prefix marking objects generated by this operator
pub const AG_PREFIX: &str = "k8s-ag-ingress-";

/// Longest object name the gateway accepts
pub const MAX_NAME_LENGTH: usize = 80;

pub const DEFAULT_PROBE_NAME: &str = "k8s-ag-ingress-defaultprobe";
pub const DEFAULT_HTTP_SETTINGS_NAME: &str = "k8s-ag-ingress-defaulthttpsetting";
pub const DEFAULT_ADDRESS_POOL_NAME: &str = "k8s-ag-ingress-defaultaddresspool";

/// Restrict to characters the gateway accepts and clamp the length
pub fn format_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '-'
            }
        })
        .collect();

    if cleaned.len() <= MAX_NAME_LENGTH {
        return cleaned;
    }
    let head = &cleaned[..39];
    let tail = &cleaned[cleaned.len() - 40..];
    format!("{}-{}", head, tail)
}

fn prefixed(raw: String) -> String {
    format_name(&format!("{}{}", AG_PREFIX, raw))
}

pub fn probe_name(backend: &BackendIdentifier) -> String {
    prefixed(format!(
        "pb-{}-{}-{}-{}",
        backend.service.namespace, backend.service.name, backend.service_port, backend.ingress
    ))
}

/// `service_port` is the port as referenced by the route; `backend_port` the resolved target
pub fn http_settings_name(
    service: &ServiceIdentifier,
    service_port: &str,
    backend_port: i32,
    owner: &str,
) -> String {
    prefixed(format!(
        "bp-{}-{}-{}-{}",
        service.full_name(),
        service_port,
        backend_port,
        owner
    ))
}

pub fn address_pool_name(service: &ServiceIdentifier, service_port: &str, backend_port: i32) -> String {
    prefixed(format!(
        "pool-{}-{}-bp-{}",
        service.full_name(),
        service_port,
        backend_port
    ))
}

pub fn frontend_port_name(port: i32) -> String {
    prefixed(format!("fp-{}", port))
}

fn listener_suffix(listener: &ListenerIdentifier) -> String {
    if listener.host_name.is_empty() {
        listener.frontend_port.to_string()
    } else {
        format!("{}-{}", listener.host_name, listener.frontend_port)
    }
}

pub fn listener_name(listener: &ListenerIdentifier) -> String {
    prefixed(format!("fl-{}", listener_suffix(listener)))
}

pub fn url_path_map_name(listener: &ListenerIdentifier) -> String {
    prefixed(format!("url-{}", listener_suffix(listener)))
}

pub fn request_routing_rule_name(listener: &ListenerIdentifier) -> String {
    prefixed(format!("rr-{}", listener_suffix(listener)))
}

/// Redirect towards the HTTPS listener `target`
pub fn redirect_name(target: &ListenerIdentifier) -> String {
    prefixed(format!("sslr-{}", listener_suffix(target)))
}

pub fn ssl_certificate_name(secret: &SecretIdentifier) -> String {
    prefixed(format!("cert-{}-{}", secret.namespace, secret.name))
}

/// Path rule for path `path_index` of rule `rule_index` (or match of an Istio route)
pub fn path_rule_name(namespace: &str, owner: &str, rule_index: usize, path_index: usize) -> String {
    prefixed(format!("pr-{}-{}-{}-{}", namespace, owner, rule_index, path_index))
}
