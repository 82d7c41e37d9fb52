//! EC2 Actuator - reconciles `Machine` resources against EC2 instances
//!
//! The external machine controller calls into [`Actuator`] with one of four
//! lifecycle verbs (create, update, delete, exists). Each verb converges the
//! cloud toward the machine's provider config and writes the observed state
//! back onto the machine through a [`MachineStore`].
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ec2_actuator::{
//!     Actuator, ActuatorConfig, ActuatorParams, CloudClientBuilder, KubeEventPublisher, KubeStore,
//! };
//!
//! # async fn example(client_builder: Arc<dyn CloudClientBuilder>) -> anyhow::Result<()> {
//! let client = kube::Client::try_default().await?;
//! let actuator = Actuator::new(ActuatorParams {
//!     store: Arc::new(KubeStore::new(client.clone())),
//!     client_builder,
//!     events: Arc::new(KubeEventPublisher::new(client, "ec2-actuator")),
//!     config: ActuatorConfig::from_env()?,
//! });
//!
//! // Called by the machine controller for every reconcile
//! // actuator.update(&cluster, &mut machine).await?;
//! # let _ = actuator;
//! # Ok(())
//! # }
//! ```

// Lifecycle entry point
pub mod actuator;
pub mod config;
pub mod error;
pub mod names;

// Observability
pub mod events;
pub mod metrics;

// Cloud and store seams
pub mod cloud;
pub mod store;

// Reconciliation building blocks
pub mod conditions;
pub mod init_lock;
pub mod instances;
pub mod last_applied;
pub mod launch;
pub mod load_balancers;
pub mod security_groups;
pub mod status;
pub mod tags;

#[cfg(test)]
mod testing;

pub use actuator::{Actuator, ActuatorParams, BootstrapMode};
pub use cloud::{CloudClient, CloudClientBuilder};
pub use config::ActuatorConfig;
pub use error::{Error, ErrorKind, Result};
pub use events::{EventPublisher, KubeEventPublisher};
pub use store::{KubeStore, MachineStore};
