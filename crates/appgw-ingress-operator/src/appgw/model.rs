//! Application Gateway configuration object
//!
//! Mirrors the ARM JSON shape of `Microsoft.Network/applicationGateways`
//! (API version 2018-12-01). Fields the pipeline does not manage are kept in
//! the `extra` maps so a snapshot round-trips without losing foreign data.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reference to another gateway (or ARM) object by resource ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Build a [`SubResource`] pointing at `id`
pub fn resource_ref(id: impl Into<String>) -> SubResource {
    SubResource {
        id: Some(id.into()),
    }
}

/// Named child object of the gateway (probe, listener, pool, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayObject<P> {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub properties: P,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<P> GatewayObject<P> {
    pub fn new(name: impl Into<String>, id: impl Into<String>, properties: P) -> Self {
        Self {
            name: name.into(),
            id: Some(id.into()),
            etag: None,
            properties,
            extra: Map::new(),
        }
    }

    /// ID of this object, falling back to its name for objects read without one
    pub fn id_or_name(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// Anything addressable by name inside the gateway
pub trait Named {
    fn name(&self) -> &str;
}

impl<P> Named for GatewayObject<P> {
    fn name(&self) -> &str {
        &self.name
    }
}

pub type Probe = GatewayObject<ProbeProperties>;
pub type BackendHttpSettings = GatewayObject<BackendHttpSettingsProperties>;
pub type BackendAddressPool = GatewayObject<BackendAddressPoolProperties>;
pub type FrontendPort = GatewayObject<FrontendPortProperties>;
pub type FrontendIpConfiguration = GatewayObject<FrontendIpConfigurationProperties>;
pub type HttpListener = GatewayObject<HttpListenerProperties>;
pub type SslCertificate = GatewayObject<SslCertificateProperties>;
pub type UrlPathMap = GatewayObject<UrlPathMapProperties>;
pub type PathRule = GatewayObject<PathRuleProperties>;
pub type RequestRoutingRule = GatewayObject<RequestRoutingRuleProperties>;
pub type RedirectConfiguration = GatewayObject<RedirectConfigurationProperties>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleType {
    #[default]
    Basic,
    PathBasedRouting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CookieBasedAffinity {
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectType {
    #[default]
    Permanent,
    Found,
    SeeOther,
    Temporary,
}

/// The whole gateway resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplicationGateway {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub properties: ApplicationGatewayProperties,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationGatewayProperties {
    #[serde(
        default,
        rename = "frontendIPConfigurations",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub frontend_ip_configurations: Vec<FrontendIpConfiguration>,
    #[serde(default)]
    pub frontend_ports: Vec<FrontendPort>,
    #[serde(default)]
    pub probes: Vec<Probe>,
    #[serde(default)]
    pub backend_address_pools: Vec<BackendAddressPool>,
    #[serde(default)]
    pub backend_http_settings_collection: Vec<BackendHttpSettings>,
    #[serde(default)]
    pub http_listeners: Vec<HttpListener>,
    #[serde(default)]
    pub ssl_certificates: Vec<SslCertificate>,
    #[serde(default)]
    pub url_path_maps: Vec<UrlPathMap>,
    #[serde(default)]
    pub request_routing_rules: Vec<RequestRoutingRule>,
    #[serde(default)]
    pub redirect_configurations: Vec<RedirectConfiguration>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeProperties {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unhealthy_threshold: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_host_name_from_backend_http_settings: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_servers: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHttpSettingsProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub cookie_based_affinity: CookieBasedAffinity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pick_host_name_from_backend_address: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAddressPoolProperties {
    #[serde(default)]
    pub backend_addresses: Vec<BackendAddress>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fqdn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrontendPortProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrontendIpConfigurationProperties {
    #[serde(
        default,
        rename = "privateIPAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub private_ip_address: Option<String>,
    #[serde(
        default,
        rename = "publicIPAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub public_ip_address: Option<SubResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpListenerProperties {
    #[serde(
        default,
        rename = "frontendIPConfiguration",
        skip_serializing_if = "Option::is_none"
    )]
    pub frontend_ip_configuration: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frontend_port: Option<SubResource>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_certificate: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_server_name_indication: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslCertificateProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_cert_data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPathMapProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend_address_pool: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_backend_http_settings: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_redirect_configuration: Option<SubResource>,
    #[serde(default)]
    pub path_rules: Vec<PathRule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathRuleProperties {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_address_pool: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_http_settings: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_configuration: Option<SubResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRoutingRuleProperties {
    #[serde(default)]
    pub rule_type: RuleType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_listener: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_address_pool: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_http_settings: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path_map: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_configuration: Option<SubResource>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectConfigurationProperties {
    #[serde(default)]
    pub redirect_type: RedirectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_listener: Option<SubResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_path: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_query_string: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Last segment of an ARM resource ID (`.../httpListeners/fl-80` → `fl-80`)
pub fn resource_name(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Name of the object a [`SubResource`] points at
pub fn referenced_name(reference: &Option<SubResource>) -> Option<&str> {
    reference
        .as_ref()
        .and_then(|r| r.id.as_deref())
        .map(resource_name)
}

/// Sort gateway objects by name so generated collections are stable
pub fn sort_by_name<T: Named>(items: &mut [T]) {
    items.sort_by(|a, b| a.name().cmp(b.name()));
}
