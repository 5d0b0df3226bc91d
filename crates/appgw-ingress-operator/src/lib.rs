//! appgw-ingress-operator: Application Gateway configuration from Kubernetes Ingress

pub mod appgw;
pub mod brownfield;
pub mod controller;
pub mod environment;
pub mod events;
pub mod gateway_client;
pub mod health;
pub mod istio;
pub mod k8scontext;
pub mod prohibited_target;
pub mod version;

#[cfg(test)]
mod fixtures;

pub use istio::VirtualService;
pub use prohibited_target::AzureIngressProhibitedTarget;
