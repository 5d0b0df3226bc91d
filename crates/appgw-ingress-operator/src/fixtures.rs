//! Shared test fixtures
//!
//! One ingress in `--namespace--` routing `bye.com` to `--service-name--` on
//! two service ports, plus the service, endpoints and pod behind it and a
//! gateway snapshot with four listeners.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EndpointAddress, EndpointPort, EndpointSubset, Endpoints, HTTPGetAction, Pod,
    PodSpec, Probe as K8sProbe, Secret, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;

use crate::appgw::annotations;
use crate::appgw::identifiers::{BackendIdentifier, Identifier, ServiceIdentifier, ServicePortRef};
use crate::appgw::model::*;
use crate::k8scontext::MemoryCache;
use crate::prohibited_target::AzureIngressProhibitedTarget;

pub const NAMESPACE: &str = "--namespace--";
pub const SERVICE_NAME: &str = "--service-name--";
pub const INGRESS_NAME: &str = "--name--";
pub const HOST: &str = "bye.com";
pub const URL_PATH: &str = "/hi";
pub const OTHER_PATH: &str = "/fox";
pub const CONTAINER_NAME: &str = "--container-name--";
pub const CONTAINER_PORT: i32 = 9876;
pub const HTTPS_TARGET_PORT_NAME: &str = "https-port";
pub const HTTPS_ENDPOINT_PORT: i32 = 9443;
pub const ENDPOINT_IP: &str = "10.9.8.7";
pub const SECRET_NAME: &str = "--the-name-of-the-secret--";

pub const SUBSCRIPTION: &str = "--subscription--";
pub const RESOURCE_GROUP: &str = "--resource-group--";
pub const GATEWAY_NAME: &str = "--app-gw-name--";

pub const PUBLIC_IP_NAME: &str = "public-ip";
pub const PRIVATE_IP_NAME: &str = "private-ip";

pub const DEFAULT_LISTENER_NAME: &str = "fl-default";
pub const LISTENER_NAME_BASIC: &str = "fl-basic";
pub const LISTENER_PATH_BASED_1: &str = "fl-path-based-1";
pub const LISTENER_PATH_BASED_2: &str = "fl-path-based-2";

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

pub fn identifier() -> Identifier {
    Identifier::new(SUBSCRIPTION, RESOURCE_GROUP, GATEWAY_NAME)
}

fn meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(NAMESPACE.to_string()),
        ..Default::default()
    }
}

pub fn service_backend(port: ServiceBackendPort) -> IngressBackend {
    IngressBackend {
        service: Some(IngressServiceBackend {
            name: SERVICE_NAME.to_string(),
            port: Some(port),
        }),
        resource: None,
    }
}

pub fn port_number(number: i32) -> ServiceBackendPort {
    ServiceBackendPort {
        number: Some(number),
        name: None,
    }
}

pub fn port_name(name: &str) -> ServiceBackendPort {
    ServiceBackendPort {
        number: None,
        name: Some(name.to_string()),
    }
}

pub fn ingress_path(path: &str, port: ServiceBackendPort) -> HTTPIngressPath {
    HTTPIngressPath {
        path: Some(path.to_string()),
        path_type: "Prefix".to_string(),
        backend: service_backend(port),
    }
}

pub fn ingress_rule(host: &str, paths: Vec<HTTPIngressPath>) -> IngressRule {
    IngressRule {
        host: if host.is_empty() { None } else { Some(host.to_string()) },
        http: Some(HTTPIngressRuleValue { paths }),
    }
}

/// `bye.com/hi` to service port 80 and `bye.com/fox` to service port `https`
pub fn ingress() -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            annotations: Some(labels(&[(
                annotations::INGRESS_CLASS,
                annotations::APPLICATION_GATEWAY_INGRESS_CLASS,
            )])),
            ..meta(INGRESS_NAME)
        },
        spec: Some(IngressSpec {
            rules: Some(vec![
                ingress_rule(HOST, vec![ingress_path(URL_PATH, port_number(80))]),
                ingress_rule(HOST, vec![ingress_path(OTHER_PATH, port_name("https"))]),
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

/// [`ingress`] with a TLS section for `bye.com`
pub fn ingress_with_tls() -> Ingress {
    let mut ingress = ingress();
    if let Some(spec) = ingress.spec.as_mut() {
        spec.tls = Some(vec![IngressTLS {
            hosts: Some(vec![HOST.to_string()]),
            secret_name: Some(SECRET_NAME.to_string()),
        }]);
    }
    ingress
}

pub fn with_annotation(mut ingress: Ingress, key: &str, value: &str) -> Ingress {
    ingress
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), value.to_string());
    ingress
}

/// Port 80 targets the container port by number, 443 targets it by name
pub fn service() -> Service {
    Service {
        metadata: meta(SERVICE_NAME),
        spec: Some(ServiceSpec {
            selector: Some(labels(&[("app", "frontend")])),
            ports: Some(vec![
                ServicePort {
                    name: Some("http".to_string()),
                    port: 80,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::Int(CONTAINER_PORT)),
                    ..Default::default()
                },
                ServicePort {
                    name: Some("https".to_string()),
                    port: 443,
                    protocol: Some("TCP".to_string()),
                    target_port: Some(IntOrString::String(HTTPS_TARGET_PORT_NAME.to_string())),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn endpoints() -> Endpoints {
    Endpoints {
        metadata: meta(SERVICE_NAME),
        subsets: Some(vec![EndpointSubset {
            addresses: Some(vec![EndpointAddress {
                ip: ENDPOINT_IP.to_string(),
                ..Default::default()
            }]),
            ports: Some(vec![
                EndpointPort {
                    name: Some("http".to_string()),
                    port: CONTAINER_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
                EndpointPort {
                    name: Some(HTTPS_TARGET_PORT_NAME.to_string()),
                    port: HTTPS_ENDPOINT_PORT,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        }]),
    }
}

/// Pod behind [`service`], with a readiness probe on the container port
pub fn pod() -> Pod {
    Pod {
        metadata: ObjectMeta {
            labels: Some(labels(&[("app", "frontend")])),
            ..meta("--pod-name--")
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: CONTAINER_NAME.to_string(),
                ports: Some(vec![ContainerPort {
                    container_port: CONTAINER_PORT,
                    name: Some("http".to_string()),
                    ..Default::default()
                }]),
                readiness_probe: Some(K8sProbe {
                    http_get: Some(HTTPGetAction {
                        port: IntOrString::Int(CONTAINER_PORT),
                        ..Default::default()
                    }),
                    period_seconds: Some(20),
                    timeout_seconds: Some(5),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        }),
        status: None,
    }
}

pub fn secret() -> Secret {
    Secret {
        metadata: meta(SECRET_NAME),
        data: Some(BTreeMap::from([
            ("tls.crt".to_string(), ByteString(b"--cert--".to_vec())),
            ("tls.key".to_string(), ByteString(b"--key--".to_vec())),
        ])),
        type_: Some("kubernetes.io/tls".to_string()),
        ..Default::default()
    }
}

pub fn cache_with_service_endpoints_and_pod() -> MemoryCache {
    let mut cache = MemoryCache::new();
    cache.add_service(service());
    cache.add_endpoints(endpoints());
    cache.add_pod(pod());
    cache.add_secret(secret());
    cache
}

pub fn backend_id(service_port: ServicePortRef) -> BackendIdentifier {
    BackendIdentifier {
        service: ServiceIdentifier::new(NAMESPACE, SERVICE_NAME),
        ingress: INGRESS_NAME.to_string(),
        rule_index: Some(0),
        path_index: Some(0),
        host: HOST.to_string(),
        path: Some(URL_PATH.to_string()),
        service_port,
    }
}

/// `{hostname: bye.com, paths: [/fox, /bar]}`
pub fn prohibited_targets() -> Vec<AzureIngressProhibitedTarget> {
    vec![AzureIngressProhibitedTarget::from_spec(
        HOST,
        vec!["/fox".to_string(), "/bar".to_string()],
    )]
}

fn listener(name: &str, port: i32, host: Option<&str>) -> HttpListener {
    let id = identifier();
    HttpListener::new(
        name,
        id.listener_id(name),
        HttpListenerProperties {
            frontend_ip_configuration: Some(resource_ref(id.frontend_ip_configuration_id(PUBLIC_IP_NAME))),
            frontend_port: Some(resource_ref(id.frontend_port_id(&format!("fp-{}", port)))),
            protocol: Protocol::Http,
            host_name: host.map(str::to_string),
            ..Default::default()
        },
    )
}

fn basic_rule(name: &str, listener: &str) -> RequestRoutingRule {
    let id = identifier();
    RequestRoutingRule::new(
        name,
        id.request_routing_rule_id(name),
        RequestRoutingRuleProperties {
            rule_type: RuleType::Basic,
            http_listener: Some(resource_ref(id.listener_id(listener))),
            backend_address_pool: Some(resource_ref(id.address_pool_id("pool-existing"))),
            backend_http_settings: Some(resource_ref(id.http_settings_id("settings-existing"))),
            ..Default::default()
        },
    )
}

fn path_based_rule(name: &str, listener: &str, path_map: &str) -> RequestRoutingRule {
    let id = identifier();
    RequestRoutingRule::new(
        name,
        id.request_routing_rule_id(name),
        RequestRoutingRuleProperties {
            rule_type: RuleType::PathBasedRouting,
            http_listener: Some(resource_ref(id.listener_id(listener))),
            url_path_map: Some(resource_ref(id.url_path_map_id(path_map))),
            ..Default::default()
        },
    )
}

fn path_map(name: &str, paths: &[&str]) -> UrlPathMap {
    let id = identifier();
    let rule_name = format!("{}-rule", name);
    UrlPathMap::new(
        name,
        id.url_path_map_id(name),
        UrlPathMapProperties {
            default_backend_address_pool: Some(resource_ref(id.address_pool_id("pool-existing"))),
            default_backend_http_settings: Some(resource_ref(id.http_settings_id("settings-existing"))),
            path_rules: vec![PathRule::new(
                rule_name.clone(),
                id.path_rule_id(name, &rule_name),
                PathRuleProperties {
                    paths: paths.iter().map(|p| p.to_string()).collect(),
                    backend_address_pool: Some(resource_ref(id.address_pool_id("pool-existing"))),
                    backend_http_settings: Some(resource_ref(id.http_settings_id("settings-existing"))),
                    ..Default::default()
                },
            )],
            ..Default::default()
        },
    )
}

/// Gateway with a default listener, two hostless path-based listeners and a
/// `bye.com` listener, each with its routing rule
pub fn app_gateway() -> ApplicationGateway {
    let id = identifier();
    let mut gateway = ApplicationGateway {
        name: Some(GATEWAY_NAME.to_string()),
        id: Some(id.gateway_id()),
        ..Default::default()
    };
    let props = &mut gateway.properties;

    props.frontend_ip_configurations = vec![
        FrontendIpConfiguration::new(
            PUBLIC_IP_NAME,
            id.frontend_ip_configuration_id(PUBLIC_IP_NAME),
            FrontendIpConfigurationProperties {
                public_ip_address: Some(resource_ref("--public-ip-id--")),
                ..Default::default()
            },
        ),
        FrontendIpConfiguration::new(
            PRIVATE_IP_NAME,
            id.frontend_ip_configuration_id(PRIVATE_IP_NAME),
            FrontendIpConfigurationProperties {
                private_ip_address: Some("10.0.0.4".to_string()),
                ..Default::default()
            },
        ),
    ];
    props.frontend_ports = [80, 8080, 8081]
        .into_iter()
        .map(|port| {
            let name = format!("fp-{}", port);
            FrontendPort::new(
                name.clone(),
                id.frontend_port_id(&name),
                FrontendPortProperties {
                    port: Some(port),
                    ..Default::default()
                },
            )
        })
        .collect();
    props.http_listeners = vec![
        listener(DEFAULT_LISTENER_NAME, 80, None),
        listener(LISTENER_PATH_BASED_1, 8080, None),
        listener(LISTENER_NAME_BASIC, 80, Some(HOST)),
        listener(LISTENER_PATH_BASED_2, 8081, None),
    ];
    props.request_routing_rules = vec![
        basic_rule("rr-default", DEFAULT_LISTENER_NAME),
        basic_rule("rr-basic", LISTENER_NAME_BASIC),
        path_based_rule("rr-path-based-1", LISTENER_PATH_BASED_1, "url-path-based-1"),
        path_based_rule("rr-path-based-2", LISTENER_PATH_BASED_2, "url-path-based-2"),
    ];
    props.url_path_maps = vec![
        path_map("url-path-based-1", &["/fox", "/baz"]),
        path_map("url-path-based-2", &["/bar"]),
    ];
    props.backend_address_pools = vec![BackendAddressPool::new(
        "pool-existing",
        id.address_pool_id("pool-existing"),
        BackendAddressPoolProperties {
            backend_addresses: vec![BackendAddress {
                fqdn: None,
                ip_address: Some("10.1.1.1".to_string()),
            }],
            ..Default::default()
        },
    )];
    props.backend_http_settings_collection = vec![BackendHttpSettings::new(
        "settings-existing",
        id.http_settings_id("settings-existing"),
        BackendHttpSettingsProperties {
            port: Some(8080),
            probe: Some(resource_ref(id.probe_id("probe-existing"))),
            ..Default::default()
        },
    )];
    props.probes = vec![Probe::new(
        "probe-existing",
        id.probe_id("probe-existing"),
        ProbeProperties {
            host: Some(HOST.to_string()),
            path: Some("/status".to_string()),
            ..Default::default()
        },
    )];
    gateway
}
