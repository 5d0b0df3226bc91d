//! Request routing rules stage
//!
//! Every listener gets exactly one routing rule. A listener whose routes
//! all land on its default target gets a `Basic` rule; anything with a
//! non-root path becomes `PathBasedRouting` through a URL path map named
//! after the listener.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use super::builder::{AppGwConfigBuilder, ConfigBuilderContext, StageError};
use super::identifiers::{BackendIdentifier, IstioMatchIdentifier, ListenerIdentifier};
use super::listeners::Listeners;
use super::model::{
    resource_ref, sort_by_name, ApplicationGateway, PathRule, PathRuleProperties, RequestRoutingRule,
    RequestRoutingRuleProperties, RuleType, UrlPathMap, UrlPathMapProperties,
};
use super::names;
use super::pools::BackendPools;
use super::settings::BackendSettings;

/// Pool and settings IDs a route forwards to
#[derive(Debug, Clone, PartialEq, Eq)]
struct BackendTarget {
    pool_id: String,
    settings_id: String,
}

/// Routing of one listener, accumulated before objects are emitted
#[derive(Debug, Default)]
struct ListenerRoutes {
    default_backend: Option<BackendTarget>,
    default_redirect: Option<String>,
    path_rules: Vec<(String, Vec<String>, BackendTarget)>,
}

/// Paths the gateway treats as "everything" on a listener
fn is_catch_all(path: Option<&str>) -> bool {
    matches!(path, None | Some("") | Some("/") | Some("/*"))
}

impl AppGwConfigBuilder {
    pub(crate) fn request_routing_rules(
        &self,
        ctx: &ConfigBuilderContext,
        backend_ids: &BTreeSet<BackendIdentifier>,
        settings: &BackendSettings,
        pools: &BackendPools,
        listeners: &Listeners,
        config: &mut ApplicationGateway,
    ) -> Result<(), StageError> {
        let mut routes: BTreeMap<ListenerIdentifier, ListenerRoutes> = listeners
            .configs
            .keys()
            .map(|id| {
                let r = ListenerRoutes {
                    default_redirect: listeners.redirect_ids.get(id).cloned(),
                    ..Default::default()
                };
                (id.clone(), r)
            })
            .collect();

        for backend in backend_ids {
            let binding = settings
                .bindings
                .get(backend)
                .ok_or_else(|| StageError::MissingBinding(format!("{}:{}", backend.service, backend.service_port)))?;
            let target = BackendTarget {
                pool_id: pools.pool_id_for(backend).to_string(),
                settings_id: binding.settings_id.clone(),
            };
            let ingress_key = (backend.service.namespace.clone(), backend.ingress.clone());

            let Some(rule_index) = backend.rule_index else {
                // Default backend: serves every listener of its ingress
                for listener in listeners.ingress_listeners.get(&ingress_key).into_iter().flatten() {
                    if let Some(r) = routes.get_mut(listener) {
                        r.default_backend.get_or_insert_with(|| target.clone());
                    }
                }
                continue;
            };

            let listener = listeners
                .rule_listeners
                .get(&(ingress_key, rule_index))
                .ok_or_else(|| StageError::MissingBinding(format!("{} rule {}", backend.ingress, rule_index)))?;
            let Some(r) = routes.get_mut(listener) else {
                continue;
            };
            if r.default_redirect.is_some() {
                debug!(listener = %listener, ingress = %backend.ingress, "Listener redirects, ignoring backend route");
                continue;
            }

            if is_catch_all(backend.path.as_deref()) {
                r.default_backend.get_or_insert(target);
            } else {
                let name = names::path_rule_name(
                    &backend.service.namespace,
                    &backend.ingress,
                    rule_index,
                    backend.path_index.unwrap_or_default(),
                );
                let path = backend.path.clone().unwrap_or_default();
                r.path_rules.push((name, vec![path], target));
            }
        }

        self.add_istio_routes(ctx, settings, pools, &mut routes);

        let mut path_maps = Vec::new();
        let mut rules = Vec::new();
        for (listener, r) in routes {
            let listener_id = listeners
                .listener_ids
                .get(&listener)
                .cloned()
                .ok_or_else(|| StageError::MissingBinding(listener.to_string()))?;
            let (map, rule) = self.emit_routing(&listener, &listener_id, r, settings, pools);
            path_maps.extend(map);
            rules.push(rule);
        }

        sort_by_name(&mut path_maps);
        sort_by_name(&mut rules);
        debug!(rules = rules.len(), path_maps = path_maps.len(), "Generated request routing rules");
        config.properties.url_path_maps = path_maps;
        config.properties.request_routing_rules = rules;
        Ok(())
    }

    fn add_istio_routes(
        &self,
        ctx: &ConfigBuilderContext,
        settings: &BackendSettings,
        pools: &BackendPools,
        routes: &mut BTreeMap<ListenerIdentifier, ListenerRoutes>,
    ) {
        for match_id in super::backends::new_istio_match_ids(ctx) {
            let Some(vs) = ctx.find_virtual_service(&match_id.namespace, &match_id.virtual_service) else {
                continue;
            };
            let Some(target) = istio_target(&match_id, settings, pools) else {
                warn!(virtual_service = %match_id.virtual_service, "No resolved destination for route");
                continue;
            };
            let uri = vs
                .spec
                .http
                .get(match_id.rule_index)
                .and_then(|route| route.matches.get(match_id.match_index))
                .and_then(|m| m.uri.as_ref());
            let path = match uri {
                None => None,
                Some(uri) => match (&uri.prefix, &uri.exact) {
                    (Some(prefix), _) => Some(format!("{}*", prefix)),
                    (None, Some(exact)) => Some(exact.clone()),
                    (None, None) => {
                        warn!(virtual_service = %match_id.virtual_service, "Regex URI matches are not supported");
                        continue;
                    }
                },
            };

            for host in &vs.spec.hosts {
                let Some(r) = routes.get_mut(&ListenerIdentifier::new(80, host.clone())) else {
                    continue;
                };
                if is_catch_all(path.as_deref()) {
                    r.default_backend.get_or_insert_with(|| target.clone());
                    continue;
                }
                let name = names::path_rule_name(
                    &match_id.namespace,
                    &match_id.virtual_service,
                    match_id.rule_index,
                    match_id.match_index,
                );
                r.path_rules
                    .push((name, path.iter().cloned().collect(), target.clone()));
            }
        }
    }

    fn emit_routing(
        &self,
        listener: &ListenerIdentifier,
        listener_id: &str,
        routes: ListenerRoutes,
        settings: &BackendSettings,
        pools: &BackendPools,
    ) -> (Option<UrlPathMap>, RequestRoutingRule) {
        let rule_name = names::request_routing_rule_name(listener);
        let default_target = || BackendTarget {
            pool_id: pools.default_pool_id.clone(),
            settings_id: settings.default_settings_id.clone(),
        };

        let mut rule_props = RequestRoutingRuleProperties {
            http_listener: Some(resource_ref(listener_id)),
            ..Default::default()
        };

        if routes.path_rules.is_empty() {
            rule_props.rule_type = RuleType::Basic;
            if let Some(redirect) = routes.default_redirect {
                rule_props.redirect_configuration = Some(resource_ref(redirect));
            } else {
                let target = routes.default_backend.unwrap_or_else(default_target);
                rule_props.backend_address_pool = Some(resource_ref(target.pool_id));
                rule_props.backend_http_settings = Some(resource_ref(target.settings_id));
            }
            let rule = RequestRoutingRule::new(
                rule_name.clone(),
                self.identifier.request_routing_rule_id(&rule_name),
                rule_props,
            );
            return (None, rule);
        }

        let map_name = names::url_path_map_name(listener);
        let mut map_props = UrlPathMapProperties::default();
        if let Some(redirect) = routes.default_redirect {
            map_props.default_redirect_configuration = Some(resource_ref(redirect));
        } else {
            let target = routes.default_backend.unwrap_or_else(default_target);
            map_props.default_backend_address_pool = Some(resource_ref(target.pool_id));
            map_props.default_backend_http_settings = Some(resource_ref(target.settings_id));
        }

        let mut seen = BTreeSet::new();
        for (name, paths, target) in routes.path_rules {
            if !seen.insert(name.clone()) {
                continue;
            }
            map_props.path_rules.push(PathRule::new(
                name.clone(),
                self.identifier.path_rule_id(&map_name, &name),
                PathRuleProperties {
                    paths,
                    backend_address_pool: Some(resource_ref(target.pool_id)),
                    backend_http_settings: Some(resource_ref(target.settings_id)),
                    ..Default::default()
                },
            ));
        }
        let map = UrlPathMap::new(map_name.clone(), self.identifier.url_path_map_id(&map_name), map_props);

        rule_props.rule_type = RuleType::PathBasedRouting;
        rule_props.url_path_map = Some(resource_ref(self.identifier.url_path_map_id(&map_name)));
        let rule = RequestRoutingRule::new(
            rule_name.clone(),
            self.identifier.request_routing_rule_id(&rule_name),
            rule_props,
        );
        (Some(map), rule)
    }
}

/// Route target of an Istio match: its first resolved destination
fn istio_target(
    match_id: &IstioMatchIdentifier,
    settings: &BackendSettings,
    pools: &BackendPools,
) -> Option<BackendTarget> {
    let destination = match_id.destinations.first()?;
    let binding = settings.istio_bindings.get(destination)?;
    Some(BackendTarget {
        pool_id: pools.istio_pool_id_for(destination).to_string(),
        settings_id: binding.settings_id.clone(),
    })
}
