//! Machine status write-back
//!
//! Status is recomputed in full and written only when it differs from what
//! the machine already carries.

use chrono::Utc;
use ec2_actuator_models::{ConditionStatus, ConditionType, Machine, ProviderStatus};
use k8s_openapi::api::core::v1::NodeAddress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use tracing::debug;

use crate::cloud::Instance;
use crate::conditions::{set_condition, UpdatePolicy};
use crate::error::{Error, Result};
use crate::names::conditions;
use crate::store::MachineStore;

fn address(kind: &str, value: &Option<String>) -> Option<NodeAddress> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|v| NodeAddress {
            address: v.to_string(),
            type_: kind.to_string(),
        })
}

pub fn node_addresses(instance: &Instance) -> Vec<NodeAddress> {
    [
        address("ExternalIP", &instance.public_ip_address),
        address("InternalIP", &instance.private_ip_address),
        address("ExternalDNS", &instance.public_dns_name),
        address("InternalDNS", &instance.private_dns_name),
    ]
    .into_iter()
    .flatten()
    .collect()
}

/// Fold the observed instance into the provider status and return the
/// addresses to report. No instance clears both.
pub fn observe_instance(status: &mut ProviderStatus, instance: Option<&Instance>) -> Vec<NodeAddress> {
    let Some(instance) = instance else {
        status.instance_id = None;
        status.instance_state = None;
        return Vec::new();
    };

    status.instance_id = Some(instance.instance_id.clone());
    status.instance_state = Some(instance.state.as_str().to_string());
    set_condition(
        &mut status.conditions,
        ConditionType::MachineCreation,
        ConditionStatus::True,
        conditions::CREATION_SUCCEEDED,
        conditions::CREATION_SUCCEEDED_MESSAGE,
        UpdatePolicy::OnReasonOrMessageChange,
    );
    node_addresses(instance)
}

/// Record a failed create on the provider status
pub fn observe_creation_failure(status: &mut ProviderStatus, err: &Error) {
    set_condition(
        &mut status.conditions,
        ConditionType::MachineCreation,
        ConditionStatus::True,
        conditions::CREATION_FAILED,
        &err.to_string(),
        UpdatePolicy::OnReasonOrMessageChange,
    );
}

/// Write `provider_status` (and `addresses`, when given) if either differs
/// from the machine's current status. On write, `last_updated` is stamped
/// and `machine` is replaced by the stored copy.
///
/// Returns whether a write happened.
pub async fn write_status(
    store: &dyn MachineStore,
    machine: &mut Machine,
    provider_status: &ProviderStatus,
    addresses: Option<Vec<NodeAddress>>,
) -> Result<bool> {
    let previous =
        ProviderStatus::from_machine(machine).map_err(|e| Error::serialization("provider status", e))?;
    let current_addresses = machine
        .status
        .as_ref()
        .map(|s| s.addresses.clone())
        .unwrap_or_default();
    let next_addresses = addresses.unwrap_or_else(|| current_addresses.clone());

    if previous == *provider_status && next_addresses == current_addresses {
        debug!(machine = %machine.name_any(), "Status unchanged, skipping write");
        return Ok(false);
    }

    let mut updated = machine.clone();
    let status = updated.status.get_or_insert_with(Default::default);
    status.provider_status = Some(
        provider_status
            .to_value()
            .map_err(|e| Error::serialization("provider status", e))?,
    );
    status.addresses = next_addresses;
    status.last_updated = Some(Time(Utc::now()));

    *machine = store.update_machine_status(&updated).await?;
    Ok(true)
}
