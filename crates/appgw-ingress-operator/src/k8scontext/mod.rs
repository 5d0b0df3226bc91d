//! Read-only view of the cluster consumed by the build pipeline
//!
//! All accessors are non-blocking lookups against caches maintained by the
//! watch layer. A missing object is `None`, never a wait.

mod memory;
mod store;

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};
use thiserror::Error;

use crate::appgw::identifiers::{SecretIdentifier, ServiceIdentifier};

pub use memory::MemoryCache;
pub use store::{StoreCache, Stores};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache has not completed its initial sync")]
    NotSynced,
}

/// Non-blocking accessors over the watch caches
pub trait ClusterCache: Send + Sync {
    /// Endpoints object backing a service
    fn get_endpoints_by_service(
        &self,
        key: &ServiceIdentifier,
    ) -> Result<Option<Arc<Endpoints>>, CacheError>;

    /// Service by namespace/name
    fn get_service(&self, key: &ServiceIdentifier) -> Option<Arc<Service>>;

    /// Pods in the service's namespace selected by its label selector
    fn list_pods_by_service_selector(&self, service: &Service) -> Vec<Arc<Pod>>;

    /// Secret by namespace/name
    fn get_secret(&self, key: &SecretIdentifier) -> Option<Arc<Secret>>;
}

/// True when every selector entry is present in `labels`.
///
/// An empty selector selects nothing (a Service without selector has no
/// managed pods).
pub(crate) fn selector_matches(
    selector: &BTreeMap<String, String>,
    labels: &BTreeMap<String, String>,
) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
}

/// Pods selected by `service` out of `pods`
pub(crate) fn select_pods<'a>(
    service: &Service,
    pods: impl IntoIterator<Item = &'a Arc<Pod>>,
) -> Vec<Arc<Pod>> {
    let Some(selector) = service.spec.as_ref().and_then(|s| s.selector.as_ref()) else {
        return Vec::new();
    };
    let namespace = service.metadata.namespace.as_deref();

    let mut selected: Vec<Arc<Pod>> = pods
        .into_iter()
        .filter(|pod| pod.metadata.namespace.as_deref() == namespace)
        .filter(|pod| {
            pod.metadata
                .labels
                .as_ref()
                .is_some_and(|labels| selector_matches(selector, labels))
        })
        .cloned()
        .collect();
    // Store iteration order is arbitrary
    selected.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    selected
}
