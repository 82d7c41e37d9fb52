//! Request and response shapes of the cloud capability

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

pub use ec2_actuator_models::Filter;

// ============================================================================
// Instances
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::ShuttingDown => "shutting-down",
            InstanceState::Terminated => "terminated",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the instance is billed; spot capacity may be reclaimed by the cloud
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum InstanceLifecycle {
    #[default]
    OnDemand,
    Spot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub instance_id: String,
    pub state: InstanceState,
    pub launch_time: Option<DateTime<Utc>>,
    pub instance_type: Option<String>,
    pub image_id: Option<String>,
    pub availability_zone: Option<String>,
    pub lifecycle: InstanceLifecycle,
    pub private_ip_address: Option<String>,
    pub public_ip_address: Option<String>,
    pub private_dns_name: Option<String>,
    pub public_dns_name: Option<String>,
    /// Ids of attached security groups
    pub security_groups: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    pub fn new(instance_id: impl Into<String>, state: InstanceState) -> Self {
        Self {
            instance_id: instance_id.into(),
            state,
            launch_time: None,
            instance_type: None,
            image_id: None,
            availability_zone: None,
            lifecycle: InstanceLifecycle::OnDemand,
            private_ip_address: None,
            public_ip_address: None,
            private_dns_name: None,
            public_dns_name: None,
            security_groups: Vec::new(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reservation {
    pub instances: Vec<Instance>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescribeInstancesInput {
    pub instance_ids: Vec<String>,
    pub filters: Vec<Filter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStateChange {
    pub instance_id: String,
    pub previous_state: InstanceState,
    pub current_state: InstanceState,
}

// ============================================================================
// Launch
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInstancesInput {
    pub image_id: String,
    pub instance_type: String,
    pub key_name: Option<String>,
    pub iam_instance_profile: Option<IamInstanceProfile>,
    pub network_interfaces: Vec<NetworkInterfaceSpec>,
    pub tag_specifications: Vec<TagSpecificationSet>,
    /// Base64 encoded
    pub user_data: Option<String>,
    pub placement: Option<PlacementSpec>,
    pub block_device_mappings: Vec<BlockDeviceMappingSpec>,
    pub instance_market_options: Option<InstanceMarketOptions>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IamInstanceProfile {
    pub arn: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInterfaceSpec {
    pub device_index: i64,
    pub associate_public_ip_address: Option<bool>,
    pub subnet_id: Option<String>,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaggedResource {
    Instance,
    Volume,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSpecificationSet {
    pub resource_type: TaggedResource,
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

impl Tag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tenancy {
    Default,
    Dedicated,
    Host,
}

impl Tenancy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Tenancy::Default),
            "dedicated" => Some(Tenancy::Dedicated),
            "host" => Some(Tenancy::Host),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementSpec {
    pub availability_zone: Option<String>,
    pub tenancy: Option<Tenancy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockDeviceMappingSpec {
    pub device_name: String,
    pub ebs: EbsSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EbsSpec {
    pub volume_size: Option<i64>,
    pub volume_type: Option<String>,
    pub iops: Option<i64>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
    pub delete_on_termination: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceMarketOptions {
    /// One-time spot request, terminated on interruption
    pub spot_max_price: Option<String>,
}

// ============================================================================
// Lookups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub image_id: String,
    /// RFC 3339
    pub creation_date: Option<String>,
    pub root_device_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub subnet_id: String,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroup {
    pub group_id: String,
    pub group_name: Option<String>,
}

// ============================================================================
// Load balancers
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadBalancer {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetType {
    Instance,
    Ip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetGroup {
    pub arn: String,
    pub target_type: TargetType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetDescription {
    /// Instance id or private IP, by the target group's target type
    pub id: String,
}
