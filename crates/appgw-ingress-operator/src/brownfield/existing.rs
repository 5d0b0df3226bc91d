use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{get_target_blacklist, Target};
use crate::appgw::model::{
    referenced_name, ApplicationGateway, BackendAddressPool, BackendHttpSettings, FrontendPort, GatewayObject,
    HttpListener, Probe, RedirectConfiguration, RequestRoutingRule, RuleType, SslCertificate, SubResource,
    UrlPathMap,
};
use crate::prohibited_target::AzureIngressProhibitedTarget;

/// Existing gateway objects serving prohibited targets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreservedResources {
    pub listeners: Vec<HttpListener>,
    pub frontend_ports: Vec<FrontendPort>,
    pub ssl_certificates: Vec<SslCertificate>,
    pub redirect_configurations: Vec<RedirectConfiguration>,
    pub routing_rules: Vec<RequestRoutingRule>,
    pub url_path_maps: Vec<UrlPathMap>,
    pub backend_address_pools: Vec<BackendAddressPool>,
    pub backend_http_settings: Vec<BackendHttpSettings>,
    pub probes: Vec<Probe>,
}

/// Deployed gateway configuration viewed through the prohibited targets
///
/// The listener index and the blacklisted listener set are computed on
/// first use and cached. A seeded index only serves name lookups;
/// classification always walks the gateway's own listeners.
pub struct ExistingResources<'a> {
    gateway: &'a ApplicationGateway,
    blacklist: Vec<Target>,
    listeners_by_name: OnceCell<BTreeMap<String, HttpListener>>,
    blacklisted_listeners: OnceCell<BTreeSet<String>>,
}

impl<'a> ExistingResources<'a> {
    pub fn new(
        gateway: &'a ApplicationGateway,
        prohibited_targets: &[AzureIngressProhibitedTarget],
        listeners_by_name: Option<BTreeMap<String, HttpListener>>,
    ) -> Self {
        Self {
            gateway,
            blacklist: get_target_blacklist(prohibited_targets),
            listeners_by_name: listeners_by_name.map(OnceCell::from).unwrap_or_default(),
            blacklisted_listeners: OnceCell::new(),
        }
    }

    pub fn listeners_by_name(&self) -> &BTreeMap<String, HttpListener> {
        self.listeners_by_name.get_or_init(|| {
            self.gateway
                .properties
                .http_listeners
                .iter()
                .map(|listener| (listener.name.clone(), listener.clone()))
                .collect()
        })
    }

    /// Names of listeners serving at least one prohibited target
    pub fn blacklisted_listeners_set(&self) -> &BTreeSet<String> {
        self.blacklisted_listeners.get_or_init(|| {
            self.gateway
                .properties
                .http_listeners
                .iter()
                .filter(|listener| {
                    let blacklisted = self
                        .listener_targets(listener)
                        .iter()
                        .any(|target| target.is_listener_blacklisted(&self.blacklist));
                    debug!(listener = %listener.name, blacklisted, "Classified existing listener");
                    blacklisted
                })
                .map(|listener| listener.name.clone())
                .collect()
        })
    }

    /// Partition the existing listeners into (blacklisted, not blacklisted)
    pub fn get_blacklisted_listeners(&self) -> (Vec<HttpListener>, Vec<HttpListener>) {
        let blacklisted = self.blacklisted_listeners_set();
        self.gateway
            .properties
            .http_listeners
            .iter()
            .cloned()
            .partition(|listener| blacklisted.contains(&listener.name))
    }

    fn rules_for_listener(&self, listener: &str) -> Vec<&'a RequestRoutingRule> {
        let gateway: &'a ApplicationGateway = self.gateway;
        gateway
            .properties
            .request_routing_rules
            .iter()
            .filter(|rule| referenced_name(&rule.properties.http_listener) == Some(listener))
            .collect()
    }

    fn path_map(&self, reference: &Option<SubResource>) -> Option<&'a UrlPathMap> {
        let name = referenced_name(reference)?;
        let gateway: &'a ApplicationGateway = self.gateway;
        gateway.properties.url_path_maps.iter().find(|map| map.name == name)
    }

    /// Every (host, path) a listener routes, from its attached rules
    fn listener_targets(&self, listener: &HttpListener) -> Vec<Target> {
        let host = listener.properties.host_name.clone().unwrap_or_default();
        let mut targets = Vec::new();
        for rule in self.rules_for_listener(&listener.name) {
            match rule.properties.rule_type {
                RuleType::Basic => targets.push(Target::new(host.clone(), None)),
                RuleType::PathBasedRouting => {
                    let Some(map) = self.path_map(&rule.properties.url_path_map) else {
                        targets.push(Target::new(host.clone(), None));
                        continue;
                    };
                    for path_rule in &map.properties.path_rules {
                        for path in &path_rule.properties.paths {
                            targets.push(Target::new(host.clone(), Some(path.clone())));
                        }
                    }
                }
            }
        }
        if targets.is_empty() {
            targets.push(Target::new(host, None));
        }
        targets
    }

    /// Everything reachable from the blacklisted listeners
    pub fn preserved_resources(&self) -> PreservedResources {
        let props = &self.gateway.properties;
        let listeners: Vec<HttpListener> = self.get_blacklisted_listeners().0;

        let mut ports = BTreeSet::new();
        let mut certificates = BTreeSet::new();
        let mut rules = BTreeSet::new();
        let mut path_maps = BTreeSet::new();
        let mut redirects = BTreeSet::new();
        let mut pools = BTreeSet::new();
        let mut settings = BTreeSet::new();

        for listener in &listeners {
            collect(&mut ports, &listener.properties.frontend_port);
            collect(&mut certificates, &listener.properties.ssl_certificate);
            for rule in self.rules_for_listener(&listener.name) {
                rules.insert(rule.name.clone());
                collect(&mut pools, &rule.properties.backend_address_pool);
                collect(&mut settings, &rule.properties.backend_http_settings);
                collect(&mut redirects, &rule.properties.redirect_configuration);
                let Some(map) = self.path_map(&rule.properties.url_path_map) else {
                    continue;
                };
                path_maps.insert(map.name.clone());
                collect(&mut pools, &map.properties.default_backend_address_pool);
                collect(&mut settings, &map.properties.default_backend_http_settings);
                collect(&mut redirects, &map.properties.default_redirect_configuration);
                for path_rule in &map.properties.path_rules {
                    collect(&mut pools, &path_rule.properties.backend_address_pool);
                    collect(&mut settings, &path_rule.properties.backend_http_settings);
                    collect(&mut redirects, &path_rule.properties.redirect_configuration);
                }
            }
        }

        let backend_http_settings: Vec<BackendHttpSettings> = pick(&props.backend_http_settings_collection, &settings);
        let probes: BTreeSet<String> = backend_http_settings
            .iter()
            .filter_map(|s| referenced_name(&s.properties.probe).map(str::to_string))
            .collect();

        PreservedResources {
            frontend_ports: pick(&props.frontend_ports, &ports),
            ssl_certificates: pick(&props.ssl_certificates, &certificates),
            redirect_configurations: pick(&props.redirect_configurations, &redirects),
            routing_rules: pick(&props.request_routing_rules, &rules),
            url_path_maps: pick(&props.url_path_maps, &path_maps),
            backend_address_pools: pick(&props.backend_address_pools, &pools),
            probes: pick(&props.probes, &probes),
            backend_http_settings,
            listeners,
        }
    }
}

fn collect(names: &mut BTreeSet<String>, reference: &Option<SubResource>) {
    if let Some(name) = referenced_name(reference) {
        names.insert(name.to_string());
    }
}

fn pick<P: Clone>(objects: &[GatewayObject<P>], names: &BTreeSet<String>) -> Vec<GatewayObject<P>> {
    objects
        .iter()
        .filter(|object| names.contains(&object.name))
        .cloned()
        .collect()
}
