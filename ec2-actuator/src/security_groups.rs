//! Additive security group reconciliation
//!
//! Only groups this actuator recorded in its annotation are ever removed.
//! Groups attached by anyone else survive every pass.

use std::collections::BTreeSet;

use ec2_actuator_models::{Machine, ResourceReference};
use tracing::info;

use crate::cloud::{CloudClient, Instance};
use crate::error::Result;
use crate::last_applied::{AppliedSecurityGroups, Present};
use crate::launch::resolve_security_group_ids;
use crate::names::annotations;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupPlan {
    /// Whether the final set differs from what is attached now
    pub changed: bool,
    /// Full set to attach, sorted
    pub group_ids: Vec<String>,
    /// Next value of the last-applied annotation
    pub applied: AppliedSecurityGroups,
}

/// Work out the group set to attach.
///
/// Desired groups are kept or added, groups dropped since the last pass are
/// removed, and attached groups never recorded as ours are carried over.
pub fn plan_security_groups(
    applied: &AppliedSecurityGroups,
    desired: &[String],
    attached: &[String],
) -> SecurityGroupPlan {
    let desired: BTreeSet<&str> = desired.iter().map(String::as_str).collect();
    let attached: BTreeSet<&str> = attached.iter().map(String::as_str).collect();
    let dropped: BTreeSet<&str> = applied.keys().filter(|id| !desired.contains(id)).collect();

    let final_set: BTreeSet<&str> = desired
        .iter()
        .copied()
        .chain(attached.iter().copied().filter(|id| !dropped.contains(id)))
        .collect();

    SecurityGroupPlan {
        changed: final_set != attached,
        group_ids: final_set.iter().map(|id| id.to_string()).collect(),
        applied: desired.iter().map(|id| (id.to_string(), Present {})).collect(),
    }
}

/// Attach the desired additional groups to the instance and record them.
/// A failed cloud call leaves the annotation untouched.
///
/// Returns whether the machine's annotations changed.
pub async fn ensure_security_groups(
    client: &dyn CloudClient,
    machine: &mut Machine,
    instance: &Instance,
    additional: &[ResourceReference],
) -> Result<bool> {
    let applied = AppliedSecurityGroups::from_annotation(machine, annotations::LAST_APPLIED_SECURITY_GROUPS)?;
    let desired = resolve_security_group_ids(client, additional).await?;
    let plan = plan_security_groups(&applied, &desired, &instance.security_groups);

    if plan.changed {
        info!(
            instance_id = %instance.instance_id,
            groups = ?plan.group_ids,
            "Updating instance security groups"
        );
        client
            .update_instance_security_groups(&instance.instance_id, &plan.group_ids)
            .await?;
    }

    plan.applied
        .write_to(machine, annotations::LAST_APPLIED_SECURITY_GROUPS)
}
