use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::existing::PreservedResources;
use crate::appgw::model::{referenced_name, resource_ref, ApplicationGateway, HttpListener, Named, SubResource};

/// Frontend port number and lowercased host a listener answers on
type ListenerBinding = (i32, String);

/// Union of `generated` and `preserved` by name, preserved objects winning
///
/// The result is sorted by name.
pub fn merge_by_name<T: Named + Clone>(generated: &[T], preserved: &[T]) -> Vec<T> {
    let mut merged: BTreeMap<String, T> = BTreeMap::new();
    for object in generated.iter().chain(preserved) {
        merged.insert(object.name().to_string(), object.clone());
    }
    merged.into_values().collect()
}

fn listener_binding(listener: &HttpListener, ports: &BTreeMap<String, i32>) -> Option<ListenerBinding> {
    let port = ports.get(referenced_name(&listener.properties.frontend_port)?)?;
    let host = listener.properties.host_name.as_deref().unwrap_or_default();
    Some((*port, host.to_ascii_lowercase()))
}

/// Remove generated listeners bound like a preserved listener
///
/// The gateway accepts one listener per (port, host). The generated
/// listener goes together with its routing rule and path map, and any
/// generated redirect aimed at it is pointed at the preserved listener.
fn drop_shadowed_listeners(config: &mut ApplicationGateway, preserved: &PreservedResources) {
    let ports: BTreeMap<String, i32> = config
        .properties
        .frontend_ports
        .iter()
        .chain(&preserved.frontend_ports)
        .filter_map(|port| port.properties.port.map(|number| (port.name.clone(), number)))
        .collect();
    let taken: BTreeMap<ListenerBinding, &HttpListener> = preserved
        .listeners
        .iter()
        .filter_map(|listener| listener_binding(listener, &ports).map(|binding| (binding, listener)))
        .collect();
    let preserved_names: BTreeSet<&str> = preserved.listeners.iter().map(|l| l.name.as_str()).collect();

    let props = &mut config.properties;
    // Dropped listener name -> preserved listener standing in for it
    let mut replaced: BTreeMap<String, SubResource> = BTreeMap::new();
    props.http_listeners.retain(|listener| {
        if preserved_names.contains(listener.name.as_str()) {
            return true;
        }
        let Some(existing) = listener_binding(listener, &ports).and_then(|binding| taken.get(&binding)) else {
            return true;
        };
        debug!(
            listener = %listener.name,
            preserved = %existing.name,
            "Dropping generated listener bound like a preserved one"
        );
        replaced.insert(listener.name.clone(), resource_ref(existing.id_or_name()));
        false
    });
    if replaced.is_empty() {
        return;
    }

    let mut dropped_maps = BTreeSet::new();
    props.request_routing_rules.retain(|rule| {
        let dropped = referenced_name(&rule.properties.http_listener).is_some_and(|name| replaced.contains_key(name));
        if dropped {
            if let Some(map) = referenced_name(&rule.properties.url_path_map) {
                dropped_maps.insert(map.to_string());
            }
        }
        !dropped
    });
    props.url_path_maps.retain(|map| !dropped_maps.contains(&map.name));

    for redirect in &mut props.redirect_configurations {
        let target = referenced_name(&redirect.properties.target_listener).and_then(|name| replaced.get(name));
        if let Some(target) = target {
            redirect.properties.target_listener = Some(target.clone());
        }
    }
}

/// Fold the objects serving prohibited targets back into `config`
///
/// Objects are merged by name with the preserved ones winning. Generated
/// listeners bound to the same port and host as a preserved listener are
/// dropped first.
pub fn merge_preserved(config: &mut ApplicationGateway, preserved: PreservedResources) {
    drop_shadowed_listeners(config, &preserved);
    let props = &mut config.properties;
    props.http_listeners = merge_by_name(&props.http_listeners, &preserved.listeners);
    props.frontend_ports = merge_by_name(&props.frontend_ports, &preserved.frontend_ports);
    props.ssl_certificates = merge_by_name(&props.ssl_certificates, &preserved.ssl_certificates);
    props.redirect_configurations =
        merge_by_name(&props.redirect_configurations, &preserved.redirect_configurations);
    props.request_routing_rules = merge_by_name(&props.request_routing_rules, &preserved.routing_rules);
    props.url_path_maps = merge_by_name(&props.url_path_maps, &preserved.url_path_maps);
    props.backend_address_pools = merge_by_name(&props.backend_address_pools, &preserved.backend_address_pools);
    props.backend_http_settings_collection =
        merge_by_name(&props.backend_http_settings_collection, &preserved.backend_http_settings);
    props.probes = merge_by_name(&props.probes, &preserved.probes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appgw::model::{
        HttpListenerProperties, Probe, ProbeProperties, RedirectConfiguration, RedirectConfigurationProperties,
        RequestRoutingRule, RequestRoutingRuleProperties, RuleType, UrlPathMap,
    };
    use crate::brownfield::ExistingResources;
    use crate::fixtures;

    fn probe(name: &str, path: &str) -> Probe {
        Probe::new(
            name,
            format!("/probes/{}", name),
            ProbeProperties {
                path: Some(path.to_string()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_merge_by_name_preserved_wins() {
        let generated = vec![probe("b", "/generated"), probe("a", "/generated")];
        let preserved = vec![probe("b", "/existing"), probe("c", "/existing")];

        let merged = merge_by_name(&generated, &preserved);
        let summary: Vec<(&str, Option<&str>)> = merged
            .iter()
            .map(|p| (p.name.as_str(), p.properties.path.as_deref()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a", Some("/generated")),
                ("b", Some("/existing")),
                ("c", Some("/existing")),
            ]
        );
    }

    #[test]
    fn test_merge_preserved_into_config() {
        let mut config = ApplicationGateway::default();
        config.properties.probes = vec![probe("generated", "/")];
        let preserved = PreservedResources {
            probes: vec![probe("existing", "/status")],
            ..Default::default()
        };

        merge_preserved(&mut config, preserved);
        let names: Vec<&str> = config.properties.probes.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["existing", "generated"]);
        assert!(config.properties.http_listeners.is_empty());
    }

    fn generated_listener(name: &str, host: &str) -> HttpListener {
        let id = fixtures::identifier();
        HttpListener::new(
            name,
            id.listener_id(name),
            HttpListenerProperties {
                frontend_port: Some(resource_ref(id.frontend_port_id("fp-80"))),
                host_name: Some(host.to_string()),
                ..Default::default()
            },
        )
    }

    fn path_based_rule(name: &str, listener: &str, path_map: &str) -> RequestRoutingRule {
        let id = fixtures::identifier();
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

    #[test]
    fn test_merge_drops_listener_bound_like_preserved_one() {
        let original = fixtures::app_gateway();
        let preserved = ExistingResources::new(&original, &fixtures::prohibited_targets(), None).preserved_resources();
        let id = fixtures::identifier();

        let mut config = ApplicationGateway::default();
        let props = &mut config.properties;
        props.frontend_ports = original.properties.frontend_ports.clone();
        props.http_listeners = vec![
            generated_listener("gen-bye", "BYE.com"),
            generated_listener("gen-other", "other.com"),
        ];
        props.request_routing_rules = vec![
            path_based_rule("rr-gen-bye", "gen-bye", "pm-gen-bye"),
            path_based_rule("rr-gen-other", "gen-other", "pm-gen-other"),
        ];
        props.url_path_maps = vec![
            UrlPathMap::new("pm-gen-bye", id.url_path_map_id("pm-gen-bye"), Default::default()),
            UrlPathMap::new("pm-gen-other", id.url_path_map_id("pm-gen-other"), Default::default()),
        ];
        props.redirect_configurations = vec![RedirectConfiguration::new(
            "redirect-gen",
            id.redirect_configuration_id("redirect-gen"),
            RedirectConfigurationProperties {
                target_listener: Some(resource_ref(id.listener_id("gen-bye"))),
                ..Default::default()
            },
        )];

        merge_preserved(&mut config, preserved);
        let props = &config.properties;

        let listeners: Vec<&str> = props.http_listeners.iter().map(|l| l.name.as_str()).collect();
        assert!(listeners.contains(&fixtures::LISTENER_NAME_BASIC));
        assert!(listeners.contains(&"gen-other"));
        assert!(!listeners.contains(&"gen-bye"));
        assert!(!props.request_routing_rules.iter().any(|r| r.name == "rr-gen-bye"));
        assert!(props.request_routing_rules.iter().any(|r| r.name == "rr-gen-other"));
        assert!(!props.url_path_maps.iter().any(|m| m.name == "pm-gen-bye"));
        assert!(props.url_path_maps.iter().any(|m| m.name == "pm-gen-other"));
        assert_eq!(
            referenced_name(&props.redirect_configurations[0].properties.target_listener),
            Some(fixtures::LISTENER_NAME_BASIC)
        );
    }
}
