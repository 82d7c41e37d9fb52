//! Cloud capability consumed by the actuator
//!
//! The actuator never talks to an SDK directly. It is handed a
//! [`CloudClientBuilder`] and asks it for a [`CloudClient`] scoped to a
//! machine's region and credentials.

mod types;

pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// A failed cloud API call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct CloudError {
    pub code: String,
    pub message: String,
    /// HTTP status of the response, when there was one
    pub status: Option<u16>,
}

impl CloudError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// 4xx: the request itself was wrong
    pub fn is_client_error(&self) -> bool {
        matches!(self.status, Some(status) if (400..500).contains(&status))
    }
}

pub type CloudResult<T> = std::result::Result<T, CloudError>;

#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn describe_images(&self, image_ids: &[String], filters: &[Filter]) -> CloudResult<Vec<Image>>;

    async fn describe_subnets(&self, filters: &[Filter]) -> CloudResult<Vec<Subnet>>;

    async fn describe_security_groups(&self, filters: &[Filter]) -> CloudResult<Vec<SecurityGroup>>;

    async fn run_instances(&self, input: &RunInstancesInput) -> CloudResult<Reservation>;

    async fn describe_instances(&self, input: &DescribeInstancesInput) -> CloudResult<Vec<Reservation>>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> CloudResult<Vec<InstanceStateChange>>;

    /// Replace the full set of security groups attached to an instance
    async fn update_instance_security_groups(&self, instance_id: &str, group_ids: &[String]) -> CloudResult<()>;

    /// Create (or overwrite) `create` and remove `delete` on one resource
    async fn update_resource_tags(&self, resource_id: &str, create: &[Tag], delete: &[Tag]) -> CloudResult<()>;

    async fn register_instances_with_classic_load_balancer(&self, load_balancer_name: &str, instance_ids: &[String]) -> CloudResult<()>;

    async fn describe_load_balancers(&self, names: &[String]) -> CloudResult<Vec<LoadBalancer>>;

    async fn describe_target_groups(&self, load_balancer_arn: &str) -> CloudResult<Vec<TargetGroup>>;

    async fn register_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> CloudResult<()>;

    async fn deregister_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> CloudResult<()>;
}

/// Static credentials read from a credentials secret
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// What a client is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientScope {
    pub region: String,
    /// `None` uses ambient credentials
    pub credentials: Option<Credentials>,
}

pub trait CloudClientBuilder: Send + Sync {
    fn build(&self, scope: &ClientScope) -> CloudResult<Arc<dyn CloudClient>>;
}
