//! Istio VirtualService CRD (the subset the gateway synthesis consumes)

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// VirtualService spec
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "networking.istio.io",
    version = "v1alpha3",
    kind = "VirtualService",
    plural = "virtualservices",
    shortname = "vs",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServiceSpec {
    /// Destination hosts to which traffic is being sent
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Gateways (and sidecars) that should apply these routes
    #[serde(default)]
    pub gateways: Vec<String>,
    /// Ordered list of HTTP route rules
    #[serde(default)]
    pub http: Vec<HttpRoute>,
}

/// HTTP route rule
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    #[serde(default)]
    pub name: Option<String>,
    /// Match conditions (any of them)
    #[serde(default, rename = "match")]
    pub matches: Vec<HttpMatchRequest>,
    /// Weighted destinations
    #[serde(default)]
    pub route: Vec<HttpRouteDestination>,
}

/// Match conditions of an HTTP route
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpMatchRequest {
    #[serde(default)]
    pub uri: Option<StringMatch>,
    /// Restricts the match to these gateways
    #[serde(default)]
    pub gateways: Vec<String>,
}

/// String match (one of exact, prefix, regex)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StringMatch {
    #[serde(default)]
    pub exact: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub regex: Option<String>,
}

/// Destination with weight
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteDestination {
    pub destination: Destination,
    #[serde(default)]
    pub weight: Option<i32>,
}

/// Destination service
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Service name (short name or FQDN)
    pub host: String,
    #[serde(default)]
    pub subset: Option<String>,
    #[serde(default)]
    pub port: Option<PortSelector>,
}

/// Destination port (number or name)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortSelector {
    #[serde(default)]
    pub number: Option<u32>,
    #[serde(default)]
    pub name: Option<String>,
}

impl Destination {
    /// Short service name: `reviews.prod.svc.cluster.local` → `reviews`
    pub fn service_name(&self) -> &str {
        self.host.split('.').next().unwrap_or(&self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_virtual_service() {
        let yaml = r#"
hosts:
  - bookinfo.example.com
gateways:
  - bookinfo-gateway
http:
  - match:
      - uri:
          prefix: /reviews
    route:
      - destination:
          host: reviews.default.svc.cluster.local
          port:
            number: 9080
"#;
        let spec: VirtualServiceSpec =
            serde_yaml::from_str(yaml).expect("test YAML should parse successfully");
        assert_eq!(spec.hosts, vec!["bookinfo.example.com"]);
        assert_eq!(spec.http.len(), 1);
        let route = &spec.http[0];
        assert_eq!(
            route.matches[0].uri.as_ref().and_then(|u| u.prefix.as_deref()),
            Some("/reviews")
        );
        let destination = &route.route[0].destination;
        assert_eq!(destination.service_name(), "reviews");
        assert_eq!(destination.port.as_ref().and_then(|p| p.number), Some(9080));
    }
}
