//! Control-plane initialization lock
//!
//! One lock record per cluster, created with compare-and-create semantics in
//! the cluster's namespace. The first machine to create it initializes the
//! control plane; everyone else joins. The record is never released here.

use std::sync::Arc;

use ec2_actuator_models::{Cluster, Machine};
use kube::ResourceExt;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::ActuatorConfig;
use crate::store::{LockRecord, MachineStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    /// The machine holds the lock; the token is stable across calls
    Acquired { token: String },
    NotAcquired,
}

pub struct ControlPlaneInitLocker {
    store: Arc<dyn MachineStore>,
    config: ActuatorConfig,
}

impl ControlPlaneInitLocker {
    pub fn new(store: Arc<dyn MachineStore>, config: ActuatorConfig) -> Self {
        Self { store, config }
    }

    /// Try to claim the cluster's init lock for `machine`.
    ///
    /// Losing a create race and any unexpected read error both count as not
    /// acquired.
    pub async fn acquire_with_token(&self, cluster: &Cluster, machine: &Machine) -> LockOutcome {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = self.config.lock_name(&cluster.name_any());
        let machine_name = machine.name_any();

        match self.store.get_lock_record(&namespace, &name).await {
            Ok(record) if record.machine_name == machine_name => {
                return LockOutcome::Acquired { token: record.token };
            }
            Ok(record) => {
                info!(
                    machine = %machine_name,
                    holder = %record.machine_name,
                    "Control plane init lock held by another machine"
                );
                return LockOutcome::NotAcquired;
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                error!(machine = %machine_name, error = %err, "Failed to read control plane init lock");
                return LockOutcome::NotAcquired;
            }
        }

        let record = LockRecord {
            machine_name: machine_name.clone(),
            token: Uuid::new_v4().to_string(),
        };
        match self
            .store
            .create_lock_record(&namespace, &name, &record, cluster)
            .await
        {
            Ok(()) => {
                info!(machine = %machine_name, lock = %name, "Acquired control plane init lock");
                LockOutcome::Acquired { token: record.token }
            }
            Err(err) if err.is_already_exists() => {
                info!(machine = %machine_name, "Lost the race for the control plane init lock");
                LockOutcome::NotAcquired
            }
            Err(err) => {
                error!(machine = %machine_name, error = %err, "Failed to create control plane init lock");
                LockOutcome::NotAcquired
            }
        }
    }
}
