//! Application Gateway configuration synthesis
//!
//! Turns a snapshot of ingresses (and optionally Istio virtual services)
//! into a complete gateway configuration. See [`builder`] for the stage
//! order.

pub mod annotations;
pub mod backends;
pub mod builder;
pub mod identifiers;
mod listeners;
pub mod model;
pub mod names;
mod pools;
pub mod ports;
mod probes;
mod rules;
mod settings;
pub mod validators;

pub use builder::{AppGwConfigBuilder, BuildError, ConfigBuilder, ConfigBuilderContext, MANAGED_BY_K8S_INGRESS};
pub use identifiers::Identifier;
pub use model::ApplicationGateway;
pub use validators::ValidationError;
