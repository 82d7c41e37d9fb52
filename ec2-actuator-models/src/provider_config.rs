//! Provider configuration carried in `Machine.spec.providerSpec.value`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::machine::Machine;

/// AWS-specific machine configuration.
///
/// Every field is optional on the wire; a machine without a provider spec
/// decodes to the default value and fails later, at the first lookup that
/// needs a missing field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Image to boot, by id or by filters
    pub ami: ResourceReference,
    /// e.g. `m5.large`
    pub instance_type: String,
    /// Tags applied at launch, in addition to the identity tags
    pub tags: Vec<TagSpecification>,
    /// Tags reconciled additively on every update
    pub additional_tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iam_instance_profile: Option<ResourceReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data_secret: Option<SecretReference>,
    /// Absent means ambient credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials_secret: Option<SecretReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub device_index: i64,
    /// Absent means the subnet default
    #[serde(rename = "publicIp", skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<bool>,
    pub security_groups: Vec<ResourceReference>,
    /// Security groups reconciled additively on every update
    pub additional_security_groups: Vec<ResourceReference>,
    pub subnet: ResourceReference,
    pub placement: Placement,
    pub load_balancers: Vec<LoadBalancerReference>,
    pub block_devices: Vec<BlockDeviceMapping>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot_market_options: Option<SpotMarketOptions>,
}

impl ProviderConfig {
    pub fn from_machine(machine: &Machine) -> serde_json::Result<Self> {
        match &machine.spec.provider_spec.value {
            Some(value) => serde_json::from_value(value.clone()),
            None => Ok(Self::default()),
        }
    }
}

/// Reference to a cloud resource by id, ARN, or filters
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ResourceReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Filter>,
}

impl ResourceReference {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    /// The explicit id, ignoring empty strings
    pub fn explicit_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Filter {
    pub name: String,
    pub values: Vec<String>,
}

impl Filter {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TagSpecification {
    pub name: String,
    pub value: String,
}

/// Secret in the machine's namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SecretReference {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Placement {
    pub region: String,
    pub availability_zone: String,
    /// `default`, `dedicated` or `host`; empty leaves it to the cloud
    pub tenancy: String,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoadBalancerType {
    #[default]
    Classic,
    Network,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoadBalancerReference {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LoadBalancerType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockDeviceMapping {
    /// Empty marks the root device
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
    pub ebs: EbsBlockDevice,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EbsBlockDevice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_key: Option<ResourceReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SpotMarketOptions {
    /// Absent means the on-demand price cap
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price: Option<String>,
}
