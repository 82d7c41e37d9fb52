//! Additive tag reconciliation

use std::collections::BTreeMap;

use ec2_actuator_models::Machine;
use tracing::info;

use crate::cloud::{CloudClient, Tag};
use crate::error::Result;
use crate::last_applied::AppliedTags;
use crate::names::annotations;

/// Delta between the last applied tags and the desired ones
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    /// New or changed
    pub created: BTreeMap<String, String>,
    /// Previously applied, no longer desired
    pub deleted: BTreeMap<String, String>,
}

impl TagDiff {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty()
    }
}

pub fn diff_tags(applied: &AppliedTags, desired: &BTreeMap<String, String>) -> TagDiff {
    let mut diff = TagDiff::default();
    for (key, value) in applied.iter() {
        if !desired.contains_key(key) {
            diff.deleted.insert(key.to_string(), value.clone());
        }
    }
    for (key, value) in desired {
        if applied.get(key) != Some(value) {
            diff.created.insert(key.clone(), value.clone());
        }
    }
    diff
}

fn to_tags(map: &BTreeMap<String, String>) -> Vec<Tag> {
    map.iter().map(|(k, v)| Tag::new(k, v)).collect()
}

/// Bring the instance's actuator-managed tags to `desired`, then record them
/// on the machine. A failed cloud call leaves the annotation untouched.
///
/// Returns whether the machine's annotations changed.
pub async fn ensure_tags(
    client: &dyn CloudClient,
    machine: &mut Machine,
    instance_id: &str,
    desired: &BTreeMap<String, String>,
) -> Result<bool> {
    let applied = AppliedTags::from_annotation(machine, annotations::LAST_APPLIED_TAGS)?;
    let diff = diff_tags(&applied, desired);

    if !diff.is_empty() {
        info!(
            instance_id,
            created = diff.created.len(),
            deleted = diff.deleted.len(),
            "Updating instance tags"
        );
        client
            .update_resource_tags(instance_id, &to_tags(&diff.created), &to_tags(&diff.deleted))
            .await?;
    }

    let recorded: AppliedTags = desired.clone().into_iter().collect();
    recorded.write_to(machine, annotations::LAST_APPLIED_TAGS)
}
