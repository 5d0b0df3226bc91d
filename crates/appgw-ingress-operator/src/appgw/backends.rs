//! Backend discovery
//!
//! Walks the ingress list (and the virtual services, when the Istio
//! integration is enabled) and produces one key per routed backend.

use std::collections::BTreeSet;

use k8s_openapi::api::networking::v1::Ingress;
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::error;

use super::builder::ConfigBuilderContext;
use super::identifiers::{
    generate_backend_id, generate_istio_destination_id, generate_istio_match_id, BackendIdentifier,
    IstioDestinationIdentifier, IstioMatchIdentifier,
};
use crate::events::{reasons, EventRecorder};
use crate::istio::HttpMatchRequest;
use crate::k8scontext::ClusterCache;

/// Every backend referenced by the context's ingresses
///
/// Includes the default backend of each ingress and every rule path.
pub fn new_backend_ids(ctx: &ConfigBuilderContext) -> BTreeSet<BackendIdentifier> {
    let mut ids = BTreeSet::new();
    for ingress in &ctx.ingress_list {
        ids.extend(ingress_backend_ids(ingress));
    }
    ids
}

pub(crate) fn ingress_backend_ids(ingress: &Ingress) -> Vec<BackendIdentifier> {
    let Some(spec) = ingress.spec.as_ref() else {
        return Vec::new();
    };
    let mut ids = Vec::new();

    if let Some(backend) = &spec.default_backend {
        ids.extend(generate_backend_id(ingress, None, None, backend));
    }
    for (rule_index, rule) in spec.rules.iter().flatten().enumerate() {
        let Some(http) = &rule.http else {
            continue;
        };
        for (path_index, path) in http.paths.iter().enumerate() {
            ids.extend(generate_backend_id(
                ingress,
                Some((rule_index, rule)),
                Some((path_index, path)),
                &path.backend,
            ));
        }
    }
    ids
}

/// [`new_backend_ids`] without backends whose service is not in the cache
///
/// Each dropped backend is logged and reported on its ingress.
pub fn new_backend_ids_filtered(
    ctx: &ConfigBuilderContext,
    cache: &dyn ClusterCache,
    recorder: &dyn EventRecorder,
) -> BTreeSet<BackendIdentifier> {
    new_backend_ids(ctx)
        .into_iter()
        .filter(|backend| {
            if cache.get_service(backend.service_key()).is_some() {
                return true;
            }
            let message = format!(
                "Unable to get the service [{}] referenced by ingress [{}]",
                backend.service, backend.ingress
            );
            error!(service = %backend.service, ingress = %backend.ingress, "{}", message);
            if let Some(ingress) = ctx.find_ingress(&backend.service.namespace, &backend.ingress) {
                recorder.event(
                    &ingress.object_ref(&()),
                    EventType::Warning,
                    reasons::SERVICE_NOT_FOUND,
                    &message,
                );
            }
            false
        })
        .collect()
}

/// Every destination routed to by the context's virtual services
pub fn new_istio_destination_ids(ctx: &ConfigBuilderContext) -> BTreeSet<IstioDestinationIdentifier> {
    ctx.istio_virtual_services
        .iter()
        .flat_map(|vs| {
            vs.spec
                .http
                .iter()
                .flat_map(|route| route.route.iter())
                .map(move |dest| generate_istio_destination_id(vs, &dest.destination))
        })
        .collect()
}

/// [`new_istio_destination_ids`] without destinations whose service is not in the cache
pub fn new_istio_destination_ids_filtered(
    ctx: &ConfigBuilderContext,
    cache: &dyn ClusterCache,
) -> BTreeSet<IstioDestinationIdentifier> {
    new_istio_destination_ids(ctx)
        .into_iter()
        .filter(|destination| {
            let found = cache.get_service(destination.service_key()).is_some();
            if !found {
                error!(
                    service = %destination.service,
                    virtual_service = %destination.virtual_service,
                    "Unable to get the service referenced by virtual service"
                );
            }
            found
        })
        .collect()
}

/// One key per HTTP route match of every virtual service
///
/// A route without match conditions yields a single key with match index 0.
pub fn new_istio_match_ids(ctx: &ConfigBuilderContext) -> Vec<IstioMatchIdentifier> {
    let unconditional = HttpMatchRequest::default();
    let mut ids = Vec::new();
    for vs in &ctx.istio_virtual_services {
        for (rule_index, route) in vs.spec.http.iter().enumerate() {
            let destinations: Vec<IstioDestinationIdentifier> = route
                .route
                .iter()
                .map(|dest| generate_istio_destination_id(vs, &dest.destination))
                .collect();
            if route.matches.is_empty() {
                ids.push(generate_istio_match_id(vs, rule_index, 0, &unconditional, destinations));
                continue;
            }
            for (match_index, request_match) in route.matches.iter().enumerate() {
                ids.push(generate_istio_match_id(
                    vs,
                    rule_index,
                    match_index,
                    request_match,
                    destinations.clone(),
                ));
            }
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appgw::identifiers::ServicePortRef;
    use crate::environment::EnvVariables;
    use crate::events::MockEventRecorder;
    use crate::fixtures;
    use crate::istio::{VirtualService, VirtualServiceSpec};
    use crate::k8scontext::MemoryCache;

    fn context(ingresses: Vec<Ingress>) -> ConfigBuilderContext {
        ConfigBuilderContext::new(ingresses, vec![fixtures::service()], Vec::new(), EnvVariables::default(), Vec::new())
    }

    #[test]
    fn test_backend_ids_per_rule_path() {
        let ids = new_backend_ids(&context(vec![fixtures::ingress()]));
        assert_eq!(ids.len(), 2);
        let ports: Vec<&ServicePortRef> = ids.iter().map(|id| &id.service_port).collect();
        assert!(ports.contains(&&ServicePortRef::Number(80)));
        assert!(ports.contains(&&ServicePortRef::Name("https".to_string())));
    }

    #[test]
    fn test_default_backend_is_collected() {
        let mut ingress = fixtures::ingress();
        if let Some(spec) = ingress.spec.as_mut() {
            spec.default_backend = Some(fixtures::service_backend(fixtures::port_number(80)));
        }
        let ids = new_backend_ids(&context(vec![ingress]));
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.iter().filter(|id| id.is_default_backend()).count(), 1);
    }

    #[test]
    fn test_missing_service_is_filtered_and_reported() {
        let cache = MemoryCache::new();
        let mut recorder = MockEventRecorder::new();
        recorder
            .expect_event()
            .withf(|_, event_type, reason, _| {
                matches!(event_type, EventType::Warning) && reason == reasons::SERVICE_NOT_FOUND
            })
            .times(2)
            .return_const(());

        let ids = new_backend_ids_filtered(&context(vec![fixtures::ingress()]), &cache, &recorder);
        assert!(ids.is_empty());
    }

    #[test]
    fn test_istio_ids() {
        let yaml = r#"
hosts: [bookinfo.example.com]
http:
  - match:
      - uri:
          prefix: /reviews
      - uri:
          exact: /ratings
    route:
      - destination:
          host: reviews.default.svc.cluster.local
          port:
            number: 9080
  - route:
      - destination:
          host: productpage
          port:
            number: 9080
"#;
        let spec: VirtualServiceSpec = serde_yaml::from_str(yaml).expect("test YAML should parse");
        let mut vs = VirtualService::new("bookinfo", spec);
        vs.metadata.namespace = Some("default".to_string());
        let ctx = ConfigBuilderContext::new(Vec::new(), Vec::new(), vec![vs], EnvVariables::default(), Vec::new());

        let destinations = new_istio_destination_ids(&ctx);
        let names: Vec<&str> = destinations.iter().map(|d| d.service.name.as_str()).collect();
        assert_eq!(names, vec!["productpage", "reviews"]);

        let matches = new_istio_match_ids(&ctx);
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[2].rule_index, 1);
        assert_eq!(matches[2].match_index, 0);
    }
}
