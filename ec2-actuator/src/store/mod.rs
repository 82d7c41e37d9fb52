//! Declarative-store access used by the actuator
//!
//! [`MachineStore`] is the narrow set of reads and writes the actuator makes
//! against the control-plane store. [`KubeStore`] implements it against a
//! Kubernetes API server.

mod kubernetes;

pub use kubernetes::KubeStore;

use std::collections::BTreeMap;

use async_trait::async_trait;
use ec2_actuator_models::{Cluster, Machine};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} {namespace}/{name} was modified concurrently")]
    Conflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] ::kube::Error),

    #[error("failed to encode or decode stored object: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Payload of the control-plane init lock record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    /// Machine that won control-plane initialization
    pub machine_name: String,
    /// Idempotency token handed to the winner
    pub token: String,
}

#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Write the machine's metadata (annotations). The machine must carry
    /// the resource version it was read at.
    async fn update_machine(&self, machine: &Machine) -> StoreResult<Machine>;

    /// Write the machine's status subresource
    async fn update_machine_status(&self, machine: &Machine) -> StoreResult<Machine>;

    /// Raw data of a secret
    async fn get_secret(&self, namespace: &str, name: &str) -> StoreResult<BTreeMap<String, Vec<u8>>>;

    async fn get_lock_record(&self, namespace: &str, name: &str) -> StoreResult<LockRecord>;

    /// Create-if-absent. Fails with [`StoreError::AlreadyExists`] when
    /// another writer got there first.
    async fn create_lock_record(
        &self,
        namespace: &str,
        name: &str,
        record: &LockRecord,
        owner: &Cluster,
    ) -> StoreResult<()>;
}
