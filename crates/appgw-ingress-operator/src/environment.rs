//! Process configuration
//!
//! Every setting is read from the environment (flags are accepted too, which
//! keeps local runs convenient). The parsed [`EnvVariables`] is carried
//! unchanged into every build pass.

use std::path::PathBuf;

use clap::Parser;

/// Default port for the health check server.
pub const DEFAULT_HEALTH_PROBE_PORT: u16 = 8081;

/// Default period between full resyncs (seconds).
pub const DEFAULT_RESYNC_PERIOD_SECS: u64 = 30;

/// Environment-backed operator configuration
#[derive(Parser, Debug, Clone, Default, PartialEq, Eq)]
#[command(name = "appgw-ingress-operator", version, about)]
pub struct EnvVariables {
    /// Subscription that owns the Application Gateway
    #[arg(long, env = "APPGW_SUBSCRIPTION_ID", default_value = "")]
    pub subscription_id: String,

    /// Resource group of the Application Gateway
    #[arg(long, env = "APPGW_RESOURCE_GROUP", default_value = "")]
    pub resource_group_name: String,

    /// Application Gateway name
    #[arg(long, env = "APPGW_NAME", default_value = "")]
    pub app_gateway_name: String,

    /// Namespace to watch (all namespaces when empty)
    #[arg(long, env = "KUBERNETES_WATCHNAMESPACE", default_value = "")]
    pub watch_namespace: String,

    /// Bind listeners to the private frontend IP configuration
    #[arg(long, env = "USE_PRIVATE_IP", default_value_t = false)]
    pub use_private_ip: bool,

    /// Share the gateway with configuration this operator does not own
    #[arg(long, env = "APPGW_ENABLE_BROWNFIELD_DEPLOYMENT", default_value_t = false)]
    pub enable_brownfield_deployment: bool,

    /// Also synthesize configuration from Istio virtual services
    #[arg(long, env = "APPGW_ENABLE_ISTIO_INTEGRATION", default_value_t = false)]
    pub enable_istio_integration: bool,

    /// Gateway configuration document used by the file-backed gateway client
    #[arg(long, env = "APPGW_CONFIG_FILE", default_value = "appgw.json")]
    pub config_file: PathBuf,

    /// Port for /healthz and /readyz
    #[arg(long, env = "HEALTH_PROBE_PORT", default_value_t = DEFAULT_HEALTH_PROBE_PORT)]
    pub health_probe_port: u16,

    /// Seconds between periodic full rebuilds
    #[arg(long, env = "RESYNC_PERIOD_SECONDS", default_value_t = DEFAULT_RESYNC_PERIOD_SECS)]
    pub resync_period_seconds: u64,
}

impl EnvVariables {
    /// Namespace filter for watches; `None` watches the whole cluster.
    pub fn watch_namespace(&self) -> Option<&str> {
        if self.watch_namespace.is_empty() {
            None
        } else {
            Some(&self.watch_namespace)
        }
    }
}
