//! Name constants shared by the actuator: cloud tag keys, machine annotations,
//! condition reasons and secret keys.

/// Cloud tag keys
pub mod tags {
    /// Carries the machine name; half of an instance's identity
    pub const NAME: &str = "Name";
    /// Carries the cluster id; the other half of an instance's identity
    pub const CLUSTER_ID: &str = "clusterid";
    /// Prefix of the `kubernetes.io/cluster/<cluster-id>` ownership tag
    pub const CLUSTER_OWNERSHIP_PREFIX: &str = "kubernetes.io/cluster/";
    pub const OWNED: &str = "owned";

    pub fn cluster_ownership_key(cluster_id: &str) -> String {
        format!("{}{}", CLUSTER_OWNERSHIP_PREFIX, cluster_id)
    }
}

/// Annotations the actuator writes on the Machine
pub mod annotations {
    /// Last additive tag set applied to the instance
    pub const LAST_APPLIED_TAGS: &str =
        "sigs.k8s.io/cluster-api-provider-aws/last-applied/tags";
    /// Last additive security group set applied to the instance
    pub const LAST_APPLIED_SECURITY_GROUPS: &str =
        "sigs.k8s.io/cluster-api-provider-aws/last-applied/security-groups";
    /// Last observed instance state
    pub const INSTANCE_STATE: &str = "machine.openshift.io/instance-state";
    /// Set on the Cluster once its control plane is serving
    pub const CONTROL_PLANE_READY: &str = "cluster.k8s.io/control-plane-ready";
}

/// Condition reasons and messages
pub mod conditions {
    pub const CREATION_SUCCEEDED: &str = "MachineCreationSucceeded";
    pub const CREATION_SUCCEEDED_MESSAGE: &str = "machine successfully created";
    pub const CREATION_FAILED: &str = "MachineCreationFailed";
}

/// Keys looked up in referenced secrets
pub mod secrets {
    pub const USER_DATA: &str = "userData";
    pub const ACCESS_KEY_ID: &str = "aws_access_key_id";
    pub const SECRET_ACCESS_KEY: &str = "aws_secret_access_key";
}

/// Key of the lock record's payload
pub const LOCK_INFORMATION_KEY: &str = "lock-information";
