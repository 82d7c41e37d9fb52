//! `Machine` and `Cluster` custom resources

use k8s_openapi::api::core::v1::NodeAddress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label carrying the cluster id a machine belongs to
pub const CLUSTER_ID_LABEL: &str = "machine.openshift.io/cluster-api-cluster";
/// Older spelling of [`CLUSTER_ID_LABEL`], still honoured as a fallback
pub const LEGACY_CLUSTER_ID_LABEL: &str = "sigs.k8s.io/cluster-api-cluster";

pub const MACHINE_TYPE_LABEL: &str = "machine.openshift.io/cluster-api-machine-type";
pub const LEGACY_MACHINE_TYPE_LABEL: &str = "sigs.k8s.io/cluster-api-machine-type";
pub const MACHINE_ROLE_LABEL: &str = "machine.openshift.io/cluster-api-machine-role";
/// Presence (with any value) marks a control-plane machine
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

// Written by the actuator from what the cloud reports about the instance
pub const REGION_LABEL: &str = "machine.openshift.io/region";
pub const ZONE_LABEL: &str = "machine.openshift.io/zone";
pub const INSTANCE_TYPE_LABEL: &str = "machine.openshift.io/instance-type";
/// Set (empty) on spot-backed machines and propagated to their node
pub const INTERRUPTIBLE_INSTANCE_LABEL: &str = "machine.openshift.io/interruptible-instance";

// ============================================================================
// Machine
// ============================================================================

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "machine.openshift.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus",
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Opaque provider configuration, decoded into [`crate::ProviderConfig`]
    #[serde(default)]
    pub provider_spec: ProviderSpec,
    #[serde(rename = "providerID", default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Metadata propagated to the node backed by this machine
    #[serde(default, skip_serializing_if = "NodeMetadata::is_empty")]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl NodeMetadata {
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    /// Network addresses reported for the backing instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<NodeAddress>,
    /// Set whenever the actuator writes a changed status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<Time>,
    /// Opaque provider status, decoded into [`crate::ProviderStatus`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_status: Option<serde_json::Value>,
}

impl Machine {
    /// Cluster the machine belongs to, read from its cluster-id label
    pub fn cluster_id(&self) -> Option<&str> {
        let labels = self.labels();
        labels
            .get(CLUSTER_ID_LABEL)
            .or_else(|| labels.get(LEGACY_CLUSTER_ID_LABEL))
            .map(String::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Whether the machine is part of the cluster's control plane
    pub fn is_control_plane(&self) -> bool {
        let labels = self.labels();
        if labels.contains_key(CONTROL_PLANE_LABEL) {
            return true;
        }
        [MACHINE_TYPE_LABEL, LEGACY_MACHINE_TYPE_LABEL]
            .iter()
            .any(|key| labels.get(*key).map(String::as_str) == Some("master"))
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations().get(key).map(String::as_str)
    }
}

// ============================================================================
// Cluster
// ============================================================================

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[kube(
    group = "cluster.k8s.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    schema = "disabled",
    derive = "PartialEq",
    derive = "Default"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_endpoint: Option<String>,
}
