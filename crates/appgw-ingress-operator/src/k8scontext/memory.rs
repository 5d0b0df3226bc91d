//! In-memory cluster cache
//!
//! Holds a fixed snapshot of cluster objects. Used to drive the pipeline
//! without a cluster (tests, offline rendering).

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Endpoints, Pod, Secret, Service};

use super::{select_pods, CacheError, ClusterCache};
use crate::appgw::identifiers::{SecretIdentifier, ServiceIdentifier};

#[derive(Debug, Default)]
pub struct MemoryCache {
    endpoints: BTreeMap<ServiceIdentifier, Arc<Endpoints>>,
    services: BTreeMap<ServiceIdentifier, Arc<Service>>,
    pods: Vec<Arc<Pod>>,
    secrets: BTreeMap<SecretIdentifier, Arc<Secret>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_endpoints(&mut self, endpoints: Endpoints) {
        let key = ServiceIdentifier::new(
            endpoints.metadata.namespace.clone().unwrap_or_default(),
            endpoints.metadata.name.clone().unwrap_or_default(),
        );
        self.endpoints.insert(key, Arc::new(endpoints));
    }

    pub fn add_service(&mut self, service: Service) {
        let key = ServiceIdentifier::new(
            service.metadata.namespace.clone().unwrap_or_default(),
            service.metadata.name.clone().unwrap_or_default(),
        );
        self.services.insert(key, Arc::new(service));
    }

    pub fn add_pod(&mut self, pod: Pod) {
        self.pods.push(Arc::new(pod));
    }

    pub fn add_secret(&mut self, secret: Secret) {
        let key = SecretIdentifier::new(
            secret.metadata.namespace.clone().unwrap_or_default(),
            secret.metadata.name.clone().unwrap_or_default(),
        );
        self.secrets.insert(key, Arc::new(secret));
    }
}

impl ClusterCache for MemoryCache {
    fn get_endpoints_by_service(
        &self,
        key: &ServiceIdentifier,
    ) -> Result<Option<Arc<Endpoints>>, CacheError> {
        Ok(self.endpoints.get(key).cloned())
    }

    fn get_service(&self, key: &ServiceIdentifier) -> Option<Arc<Service>> {
        self.services.get(key).cloned()
    }

    fn list_pods_by_service_selector(&self, service: &Service) -> Vec<Arc<Pod>> {
        select_pods(service, self.pods.iter())
    }

    fn get_secret(&self, key: &SecretIdentifier) -> Option<Arc<Secret>> {
        self.secrets.get(key).cloned()
    }
}
