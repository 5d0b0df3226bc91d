//! Reflector-backed cluster cache

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};
use kube::runtime::reflector::{ObjectRef, Store};
use tracing::debug;

use super::{select_pods, CacheError, ClusterCache};
use crate::appgw::identifiers::{SecretIdentifier, ServiceIdentifier};

/// Reader halves of the reflectors fed by the watch layer
#[derive(Clone)]
pub struct Stores {
    pub endpoints: Store<Endpoints>,
    pub services: Store<Service>,
    pub pods: Store<Pod>,
    pub secrets: Store<Secret>,
}

/// [`ClusterCache`] over reflector stores
///
/// Lookups read the stores directly, so they never block on a watch event.
/// Endpoint lookups report [`CacheError::NotSynced`] until the watch layer
/// marks the initial list as complete.
pub struct StoreCache {
    stores: Stores,
    synced: AtomicBool,
}

impl StoreCache {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            synced: AtomicBool::new(false),
        }
    }

    /// Record that every reflector finished its initial list.
    pub fn mark_synced(&self) {
        self.synced.store(true, Ordering::SeqCst);
        debug!("Cluster cache synced");
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

impl ClusterCache for StoreCache {
    fn get_endpoints_by_service(
        &self,
        key: &ServiceIdentifier,
    ) -> Result<Option<Arc<Endpoints>>, CacheError> {
        if !self.is_synced() {
            return Err(CacheError::NotSynced);
        }
        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        Ok(self.stores.endpoints.get(&obj_ref))
    }

    fn get_service(&self, key: &ServiceIdentifier) -> Option<Arc<Service>> {
        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        self.stores.services.get(&obj_ref)
    }

    fn list_pods_by_service_selector(&self, service: &Service) -> Vec<Arc<Pod>> {
        let pods = self.stores.pods.state();
        select_pods(service, pods.iter())
    }

    fn get_secret(&self, key: &SecretIdentifier) -> Option<Arc<Secret>> {
        let obj_ref = ObjectRef::new(&key.name).within(&key.namespace);
        self.stores.secrets.get(&obj_ref)
    }
}
