//! AzureIngressProhibitedTarget CRD
//!
//! Declares a hostname (and optionally a list of paths) on the shared gateway
//! that this operator must not manage.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// AzureIngressProhibitedTarget spec
///
/// An empty hostname together with no paths prohibits everything.
/// A hostname with no paths prohibits every path under that host.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "appgw.ingress.k8s.io",
    version = "v1",
    kind = "AzureIngressProhibitedTarget",
    plural = "azureingressprohibitedtargets",
    shortname = "aipt",
    namespaced,
    printcolumn = r#"{"name":"Hostname", "type":"string", "jsonPath":".spec.hostname"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AzureIngressProhibitedTargetSpec {
    /// Hostname the operator must leave alone (all hosts when empty)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    /// Paths under the hostname the operator must leave alone (all paths when empty)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

impl AzureIngressProhibitedTarget {
    /// Build a prohibited target without object metadata (used for in-memory snapshots).
    pub fn from_spec(hostname: impl Into<String>, paths: Vec<String>) -> Self {
        AzureIngressProhibitedTarget::new(
            "",
            AzureIngressProhibitedTargetSpec {
                hostname: hostname.into(),
                paths,
            },
        )
    }
}
