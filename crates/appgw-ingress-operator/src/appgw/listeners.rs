//! Listeners stage: frontend ports, SSL certificates, HTTP listeners and
//! SSL redirect configurations

use std::collections::{BTreeMap, BTreeSet};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, warn};

use super::annotations::{self, AnnotationError};
use super::builder::{AppGwConfigBuilder, ConfigBuilderContext, StageError};
use super::identifiers::{generate_listener_id, ListenerIdentifier, SecretIdentifier};
use super::model::{
    resource_ref, sort_by_name, ApplicationGateway, FrontendPort, FrontendPortProperties, HttpListener,
    HttpListenerProperties, Protocol, RedirectConfiguration, RedirectConfigurationProperties, RedirectType,
    SslCertificate, SslCertificateProperties,
};
use super::names;
use crate::brownfield;
use crate::events::reasons;

/// How one listener is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ListenerConfig {
    pub protocol: Protocol,
    pub ssl_certificate: Option<SecretIdentifier>,
    /// HTTPS listener this listener redirects to
    pub redirect_to: Option<ListenerIdentifier>,
}

impl ListenerConfig {
    fn http() -> Self {
        Self {
            protocol: Protocol::Http,
            ssl_certificate: None,
            redirect_to: None,
        }
    }
}

/// (namespace, ingress name)
pub(crate) type IngressKey = (String, String);

/// Output of the listeners stage, consumed by the rules stage
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    pub configs: BTreeMap<ListenerIdentifier, ListenerConfig>,
    /// Listener serving the backends of each ingress rule
    pub rule_listeners: BTreeMap<(IngressKey, usize), ListenerIdentifier>,
    /// Listeners serving each ingress, used for its default backend
    pub ingress_listeners: BTreeMap<IngressKey, BTreeSet<ListenerIdentifier>>,
    pub listener_ids: BTreeMap<ListenerIdentifier, String>,
    pub redirect_ids: BTreeMap<ListenerIdentifier, String>,
}

fn ingress_key(ingress: &Ingress) -> IngressKey {
    (
        ingress.metadata.namespace.clone().unwrap_or_default(),
        ingress.metadata.name.clone().unwrap_or_default(),
    )
}

/// PEM bundle of a `kubernetes.io/tls` secret, base64 encoded
fn certificate_data(secret: &Secret) -> Option<String> {
    let data = secret.data.as_ref()?;
    let cert = data.get("tls.crt")?;
    let key = data.get("tls.key")?;
    let mut bundle = cert.0.clone();
    if !bundle.ends_with(b"\n") {
        bundle.push(b'\n');
    }
    bundle.extend_from_slice(&key.0);
    Some(STANDARD.encode(bundle))
}

impl AppGwConfigBuilder {
    /// Decide which listeners exist and which ingress rules they serve
    fn plan_listeners(&self, ctx: &ConfigBuilderContext) -> Listeners {
        let mut plan = Listeners::default();
        // Every existing listener is preserved, hostless port 80 included
        let locked_out =
            ctx.env.enable_brownfield_deployment && brownfield::is_universally_prohibited(&ctx.prohibited_targets);

        for ingress in &ctx.ingress_list {
            let key = ingress_key(ingress);
            let override_port = match annotations::override_frontend_port(ingress) {
                Ok(port) => Some(port),
                Err(AnnotationError::Missing { .. }) => None,
                Err(e) => {
                    warn!(ingress = %key.1, error = %e, "Ignoring frontend port override");
                    None
                }
            };
            let ssl_redirect = annotations::is_ssl_redirect(ingress);
            let rules = ingress
                .spec
                .as_ref()
                .and_then(|s| s.rules.as_ref())
                .map(Vec::as_slice)
                .unwrap_or_default();

            for (rule_index, rule) in rules.iter().enumerate() {
                let host = rule.host.as_deref().unwrap_or_default();
                let serving = match self.tls_secret_for(ingress, host) {
                    Some(secret) => {
                        let https = generate_listener_id(rule, Protocol::Https, override_port);
                        plan.configs.entry(https.clone()).or_insert(ListenerConfig {
                            protocol: Protocol::Https,
                            ssl_certificate: Some(secret),
                            redirect_to: None,
                        });
                        if ssl_redirect {
                            let http = generate_listener_id(rule, Protocol::Http, None);
                            plan.configs.insert(
                                http,
                                ListenerConfig {
                                    redirect_to: Some(https.clone()),
                                    ..ListenerConfig::http()
                                },
                            );
                        }
                        https
                    }
                    None => {
                        let http = generate_listener_id(rule, Protocol::Http, override_port);
                        plan.configs.entry(http.clone()).or_insert_with(ListenerConfig::http);
                        http
                    }
                };
                plan.ingress_listeners
                    .entry(key.clone())
                    .or_default()
                    .insert(serving.clone());
                plan.rule_listeners.insert((key.clone(), rule_index), serving);
            }

            let has_default_backend = ingress
                .spec
                .as_ref()
                .is_some_and(|s| s.default_backend.is_some());
            if rules.is_empty() && has_default_backend && !locked_out {
                let catch_all = ListenerIdentifier::new(override_port.unwrap_or(80), "");
                plan.configs.entry(catch_all.clone()).or_insert_with(ListenerConfig::http);
                plan.ingress_listeners.entry(key).or_default().insert(catch_all);
            }
        }

        for vs in &ctx.istio_virtual_services {
            for host in &vs.spec.hosts {
                plan.configs
                    .entry(ListenerIdentifier::new(80, host.clone()))
                    .or_insert_with(ListenerConfig::http);
            }
        }

        if plan.configs.is_empty() && !locked_out {
            plan.configs
                .insert(ListenerIdentifier::new(80, ""), ListenerConfig::http());
        }
        plan
    }

    /// Secret of the TLS section covering `host`, if it is in the cache
    fn tls_secret_for(&self, ingress: &Ingress, host: &str) -> Option<SecretIdentifier> {
        let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
        let tls = ingress.spec.as_ref()?.tls.as_ref()?;
        let entry = tls.iter().find(|entry| match entry.hosts.as_deref() {
            None | Some([]) => true,
            Some(hosts) => hosts.iter().any(|h| h == host),
        })?;
        let secret_name = entry.secret_name.as_deref().filter(|s| !s.is_empty())?;
        let secret = SecretIdentifier::new(namespace, secret_name);

        if self.cache.get_secret(&secret).is_none() {
            let message = format!("Unable to find the secret [{}]", secret);
            warn!(host, "{}", message);
            self.recorder.event(
                &ingress.object_ref(&()),
                EventType::Warning,
                reasons::SECRET_NOT_FOUND,
                &message,
            );
            return None;
        }
        Some(secret)
    }

    fn frontend_ip_configuration_id(&self, config: &ApplicationGateway, use_private_ip: bool) -> Result<String, StageError> {
        config
            .properties
            .frontend_ip_configurations
            .iter()
            .find(|ip| {
                if use_private_ip {
                    ip.properties.private_ip_address.is_some()
                } else {
                    ip.properties.public_ip_address.is_some()
                }
            })
            .map(|ip| {
                ip.id
                    .clone()
                    .unwrap_or_else(|| self.identifier.frontend_ip_configuration_id(&ip.name))
            })
            .ok_or(StageError::NoFrontendIpConfiguration(if use_private_ip {
                "private"
            } else {
                "public"
            }))
    }

    /// Frontend port for `port`, reusing an existing one with the same number
    fn frontend_port(&self, port: i32) -> FrontendPort {
        if let Some(existing) = self
            .original
            .properties
            .frontend_ports
            .iter()
            .find(|p| p.properties.port == Some(port))
        {
            return existing.clone();
        }
        let name = names::frontend_port_name(port);
        FrontendPort::new(
            name.clone(),
            self.identifier.frontend_port_id(&name),
            FrontendPortProperties {
                port: Some(port),
                ..Default::default()
            },
        )
    }

    pub(crate) fn listeners(
        &self,
        ctx: &ConfigBuilderContext,
        config: &mut ApplicationGateway,
    ) -> Result<Listeners, StageError> {
        let frontend_ip_id = self.frontend_ip_configuration_id(config, ctx.env.use_private_ip)?;
        let mut plan = self.plan_listeners(ctx);

        let mut ports: BTreeMap<i32, FrontendPort> = BTreeMap::new();
        let mut certificates: BTreeMap<String, SslCertificate> = BTreeMap::new();
        let mut listeners: Vec<HttpListener> = Vec::new();
        let mut redirects: Vec<RedirectConfiguration> = Vec::new();

        for (id, listener_config) in &plan.configs {
            let port = ports
                .entry(id.frontend_port)
                .or_insert_with(|| self.frontend_port(id.frontend_port));
            let port_id = port.id_or_name().to_string();

            let ssl_certificate = match &listener_config.ssl_certificate {
                Some(secret) => {
                    let name = names::ssl_certificate_name(secret);
                    if !certificates.contains_key(&name) {
                        let data = self.cache.get_secret(secret).and_then(|s| certificate_data(&s));
                        if data.is_none() {
                            warn!(secret = %secret, "Secret has no tls.crt/tls.key pair");
                        }
                        certificates.insert(
                            name.clone(),
                            SslCertificate::new(
                                name.clone(),
                                self.identifier.ssl_certificate_id(&name),
                                SslCertificateProperties {
                                    data,
                                    ..Default::default()
                                },
                            ),
                        );
                    }
                    Some(resource_ref(self.identifier.ssl_certificate_id(&name)))
                }
                None => None,
            };

            let name = names::listener_name(id);
            let listener = HttpListener::new(
                name.clone(),
                self.identifier.listener_id(&name),
                HttpListenerProperties {
                    frontend_ip_configuration: Some(resource_ref(frontend_ip_id.clone())),
                    frontend_port: Some(resource_ref(port_id)),
                    protocol: listener_config.protocol,
                    host_name: (!id.host_name.is_empty()).then(|| id.host_name.clone()),
                    require_server_name_indication: ssl_certificate
                        .as_ref()
                        .map(|_| !id.host_name.is_empty()),
                    ssl_certificate,
                    ..Default::default()
                },
            );
            plan.listener_ids
                .insert(id.clone(), listener.id_or_name().to_string());
            listeners.push(listener);

            if let Some(target) = &listener_config.redirect_to {
                let redirect_name = names::redirect_name(target);
                let target_listener_id = self.identifier.listener_id(&names::listener_name(target));
                let redirect = RedirectConfiguration::new(
                    redirect_name.clone(),
                    self.identifier.redirect_configuration_id(&redirect_name),
                    RedirectConfigurationProperties {
                        redirect_type: RedirectType::Permanent,
                        target_listener: Some(resource_ref(target_listener_id)),
                        include_path: Some(true),
                        include_query_string: Some(true),
                        ..Default::default()
                    },
                );
                plan.redirect_ids
                    .insert(id.clone(), redirect.id_or_name().to_string());
                redirects.push(redirect);
            }
        }

        let mut ports: Vec<FrontendPort> = ports.into_values().collect();
        sort_by_name(&mut ports);
        let mut certificates: Vec<SslCertificate> = certificates.into_values().collect();
        sort_by_name(&mut certificates);
        sort_by_name(&mut listeners);
        sort_by_name(&mut redirects);
        redirects.dedup_by(|a, b| a.name == b.name);

        debug!(
            listeners = listeners.len(),
            ports = ports.len(),
            certificates = certificates.len(),
            redirects = redirects.len(),
            "Generated listeners"
        );
        config.properties.frontend_ports = ports;
        config.properties.ssl_certificates = certificates;
        config.properties.http_listeners = listeners;
        config.properties.redirect_configurations = redirects;
        Ok(plan)
    }
}
