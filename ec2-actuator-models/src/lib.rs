//! EC2 Actuator Models - declarative-store objects consumed by the machine actuator
//!
//! This crate holds the custom resources the actuator reads (`Machine`, `Cluster`)
//! and the provider-specific blobs carried inside them (`ProviderConfig` in the
//! machine spec, `ProviderStatus` in the machine status).

pub mod machine;
pub mod provider_config;
pub mod provider_status;

pub use machine::*;
pub use provider_config::*;
pub use provider_status::*;
