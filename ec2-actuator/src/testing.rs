//! In-memory collaborators for unit tests

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use ec2_actuator_models::{Cluster, ClusterSpec, Machine, MachineSpec, ProviderSpec, CLUSTER_ID_LABEL};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use serde_json::json;

use crate::cloud::*;
use crate::events::EventPublisher;
use crate::store::{LockRecord, MachineStore, StoreError, StoreResult};

pub const NAMESPACE: &str = "default";
pub const CLUSTER_NAME: &str = "test-cluster";

// ============================================================================
// Cloud
// ============================================================================

#[derive(Debug, Default)]
pub struct CloudState {
    pub instances: Vec<Instance>,
    pub images: Vec<Image>,
    pub subnets: Vec<Subnet>,
    pub security_groups: Vec<SecurityGroup>,
    pub load_balancers: Vec<LoadBalancer>,
    /// Load balancer ARN to its target groups
    pub target_groups: BTreeMap<String, Vec<TargetGroup>>,
    /// State given to newly launched instances
    pub launch_state: Option<InstanceState>,
    pub run_error: Option<CloudError>,
    pub failing_classic: BTreeSet<String>,
    pub failing_target_groups: BTreeSet<String>,
    pub fail_tag_updates: bool,

    pub run_requests: Vec<RunInstancesInput>,
    pub image_lookups: Vec<Vec<String>>,
    pub subnet_lookups: Vec<Vec<Filter>>,
    pub terminate_calls: Vec<Vec<String>>,
    pub security_group_updates: Vec<(String, Vec<String>)>,
    pub tag_updates: Vec<(String, Vec<Tag>, Vec<Tag>)>,
    pub classic_registrations: Vec<(String, Vec<String>)>,
    pub target_registrations: Vec<(String, Vec<TargetDescription>)>,
    pub target_deregistrations: Vec<(String, Vec<TargetDescription>)>,
}

#[derive(Debug, Default)]
pub struct FakeCloud {
    pub state: Mutex<CloudState>,
}

fn cloud_error(code: &str, message: impl Into<String>) -> CloudError {
    CloudError::new(code, message).with_status(500)
}

fn matches_filters(instance: &Instance, filters: &[Filter]) -> bool {
    filters.iter().all(|filter| {
        if let Some(key) = filter.name.strip_prefix("tag:") {
            instance
                .tags
                .get(key)
                .map_or(false, |value| filter.values.contains(value))
        } else if filter.name == "instance-state-name" {
            filter.values.iter().any(|v| v == instance.state.as_str())
        } else {
            true
        }
    })
}

impl FakeCloud {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_state(f: impl FnOnce(&mut CloudState)) -> Arc<Self> {
        let cloud = Self::default();
        f(&mut *cloud.state.lock().unwrap());
        Arc::new(cloud)
    }

    pub fn state(&self) -> std::sync::MutexGuard<'_, CloudState> {
        self.state.lock().unwrap()
    }

    /// Every call that changes cloud state
    pub fn mutation_count(&self) -> usize {
        let state = self.state();
        state.run_requests.len()
            + state.terminate_calls.len()
            + state.security_group_updates.len()
            + state.tag_updates.len()
    }
}

#[async_trait]
impl CloudClient for FakeCloud {
    async fn describe_images(&self, image_ids: &[String], _filters: &[Filter]) -> CloudResult<Vec<Image>> {
        let mut state = self.state();
        state.image_lookups.push(image_ids.to_vec());
        Ok(state
            .images
            .iter()
            .filter(|image| image_ids.is_empty() || image_ids.contains(&image.image_id))
            .cloned()
            .collect())
    }

    async fn describe_subnets(&self, filters: &[Filter]) -> CloudResult<Vec<Subnet>> {
        let mut state = self.state();
        state.subnet_lookups.push(filters.to_vec());
        let zone = filters
            .iter()
            .find(|f| f.name == "availabilityZone")
            .map(|f| f.values.clone());
        Ok(state
            .subnets
            .iter()
            .filter(|subnet| match (&zone, &subnet.availability_zone) {
                (Some(zones), Some(az)) => zones.contains(az),
                _ => true,
            })
            .cloned()
            .collect())
    }

    async fn describe_security_groups(&self, filters: &[Filter]) -> CloudResult<Vec<SecurityGroup>> {
        let names: Vec<String> = filters
            .iter()
            .filter(|f| f.name == "tag:Name" || f.name == "group-name")
            .flat_map(|f| f.values.clone())
            .collect();
        Ok(self
            .state()
            .security_groups
            .iter()
            .filter(|group| match &group.group_name {
                Some(name) => names.is_empty() || names.contains(name),
                None => names.is_empty(),
            })
            .cloned()
            .collect())
    }

    async fn run_instances(&self, input: &RunInstancesInput) -> CloudResult<Reservation> {
        let mut state = self.state();
        state.run_requests.push(input.clone());
        if let Some(err) = state.run_error.clone() {
            return Err(err);
        }

        let index = state.instances.len() + 1;
        let mut instance = Instance::new(
            format!("i-{:04}", index),
            state.launch_state.unwrap_or(InstanceState::Running),
        );
        instance.launch_time = Some(Utc::now());
        instance.image_id = Some(input.image_id.clone());
        instance.instance_type = Some(input.instance_type.clone());
        instance.availability_zone = Some(
            input
                .placement
                .as_ref()
                .and_then(|p| p.availability_zone.clone())
                .unwrap_or_else(|| "us-east-1a".to_string()),
        );
        if input.instance_market_options.is_some() {
            instance.lifecycle = InstanceLifecycle::Spot;
        }
        instance.private_ip_address = Some(format!("10.0.0.{}", index));
        instance.private_dns_name = Some(format!("ip-10-0-0-{}.ec2.internal", index));
        instance.security_groups = input
            .network_interfaces
            .first()
            .map(|nic| nic.groups.clone())
            .unwrap_or_default();
        instance.tags = input
            .tag_specifications
            .iter()
            .filter(|spec| spec.resource_type == TaggedResource::Instance)
            .flat_map(|spec| spec.tags.iter().map(|t| (t.key.clone(), t.value.clone())))
            .collect();

        state.instances.push(instance.clone());
        Ok(Reservation {
            instances: vec![instance],
        })
    }

    async fn describe_instances(&self, input: &DescribeInstancesInput) -> CloudResult<Vec<Reservation>> {
        let instances = self
            .state()
            .instances
            .iter()
            .filter(|i| input.instance_ids.is_empty() || input.instance_ids.contains(&i.instance_id))
            .filter(|i| matches_filters(i, &input.filters))
            .cloned()
            .collect();
        Ok(vec![Reservation { instances }])
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> CloudResult<Vec<InstanceStateChange>> {
        let mut state = self.state();
        state.terminate_calls.push(instance_ids.to_vec());
        let mut changes = Vec::new();
        for instance in state.instances.iter_mut() {
            if instance_ids.contains(&instance.instance_id) {
                changes.push(InstanceStateChange {
                    instance_id: instance.instance_id.clone(),
                    previous_state: instance.state,
                    current_state: InstanceState::ShuttingDown,
                });
                instance.state = InstanceState::ShuttingDown;
            }
        }
        Ok(changes)
    }

    async fn update_instance_security_groups(&self, instance_id: &str, group_ids: &[String]) -> CloudResult<()> {
        let mut state = self.state();
        state
            .security_group_updates
            .push((instance_id.to_string(), group_ids.to_vec()));
        if let Some(instance) = state.instances.iter_mut().find(|i| i.instance_id == instance_id) {
            instance.security_groups = group_ids.to_vec();
        }
        Ok(())
    }

    async fn update_resource_tags(&self, resource_id: &str, create: &[Tag], delete: &[Tag]) -> CloudResult<()> {
        let mut state = self.state();
        if state.fail_tag_updates {
            return Err(cloud_error("RequestLimitExceeded", "tag update throttled"));
        }
        state
            .tag_updates
            .push((resource_id.to_string(), create.to_vec(), delete.to_vec()));
        if let Some(instance) = state.instances.iter_mut().find(|i| i.instance_id == resource_id) {
            for tag in delete {
                instance.tags.remove(&tag.key);
            }
            for tag in create {
                instance.tags.insert(tag.key.clone(), tag.value.clone());
            }
        }
        Ok(())
    }

    async fn register_instances_with_classic_load_balancer(&self, load_balancer_name: &str, instance_ids: &[String]) -> CloudResult<()> {
        let mut state = self.state();
        if state.failing_classic.contains(load_balancer_name) {
            return Err(cloud_error("LoadBalancerNotFound", load_balancer_name));
        }
        state
            .classic_registrations
            .push((load_balancer_name.to_string(), instance_ids.to_vec()));
        Ok(())
    }

    async fn describe_load_balancers(&self, names: &[String]) -> CloudResult<Vec<LoadBalancer>> {
        Ok(self
            .state()
            .load_balancers
            .iter()
            .filter(|lb| names.contains(&lb.name))
            .cloned()
            .collect())
    }

    async fn describe_target_groups(&self, load_balancer_arn: &str) -> CloudResult<Vec<TargetGroup>> {
        Ok(self
            .state()
            .target_groups
            .get(load_balancer_arn)
            .cloned()
            .unwrap_or_default())
    }

    async fn register_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> CloudResult<()> {
        let mut state = self.state();
        if state.failing_target_groups.contains(target_group_arn) {
            return Err(cloud_error("TargetGroupNotFound", target_group_arn));
        }
        state
            .target_registrations
            .push((target_group_arn.to_string(), targets.to_vec()));
        Ok(())
    }

    async fn deregister_targets(&self, target_group_arn: &str, targets: &[TargetDescription]) -> CloudResult<()> {
        let mut state = self.state();
        if state.failing_target_groups.contains(target_group_arn) {
            return Err(cloud_error("TargetGroupNotFound", target_group_arn));
        }
        state
            .target_deregistrations
            .push((target_group_arn.to_string(), targets.to_vec()));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeClientBuilder {
    pub cloud: Arc<FakeCloud>,
    pub scopes: Mutex<Vec<ClientScope>>,
}

impl FakeClientBuilder {
    pub fn new(cloud: Arc<FakeCloud>) -> Arc<Self> {
        Arc::new(Self {
            cloud,
            scopes: Mutex::new(Vec::new()),
        })
    }
}

impl CloudClientBuilder for FakeClientBuilder {
    fn build(&self, scope: &ClientScope) -> CloudResult<Arc<dyn CloudClient>> {
        self.scopes.lock().unwrap().push(scope.clone());
        Ok(self.cloud.clone())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Default)]
pub struct MemoryStore {
    /// Last written copy of each machine, by name
    pub machines: Mutex<BTreeMap<String, Machine>>,
    pub metadata_writes: AtomicUsize,
    pub status_writes: AtomicUsize,
    pub secrets: Mutex<BTreeMap<(String, String), BTreeMap<String, Vec<u8>>>>,
    pub locks: Mutex<BTreeMap<(String, String), LockRecord>>,
    pub fail_lock_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_secret(&self, name: &str, data: &[(&str, &str)]) {
        self.secrets.lock().unwrap().insert(
            (NAMESPACE.to_string(), name.to_string()),
            data.iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        );
    }

    pub fn metadata_writes(&self) -> usize {
        self.metadata_writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self, name: &str) -> Option<Machine> {
        self.machines.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl MachineStore for MemoryStore {
    async fn update_machine(&self, machine: &Machine) -> StoreResult<Machine> {
        self.metadata_writes.fetch_add(1, Ordering::SeqCst);
        let name = machine.metadata.name.clone().unwrap_or_default();
        self.machines.lock().unwrap().insert(name, machine.clone());
        Ok(machine.clone())
    }

    async fn update_machine_status(&self, machine: &Machine) -> StoreResult<Machine> {
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        let name = machine.metadata.name.clone().unwrap_or_default();
        self.machines.lock().unwrap().insert(name, machine.clone());
        Ok(machine.clone())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "Secret",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn get_lock_record(&self, namespace: &str, name: &str) -> StoreResult<LockRecord> {
        if self.fail_lock_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Other("connection refused".to_string()));
        }
        tokio::task::yield_now().await;
        self.locks
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }

    async fn create_lock_record(
        &self,
        namespace: &str,
        name: &str,
        record: &LockRecord,
        _owner: &Cluster,
    ) -> StoreResult<()> {
        tokio::task::yield_now().await;
        let mut locks = self.locks.lock().unwrap();
        let key = (namespace.to_string(), name.to_string());
        if locks.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "ConfigMap",
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        }
        locks.insert(key, record.clone());
        Ok(())
    }
}

// ============================================================================
// Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub object: String,
    pub warning: bool,
    pub reason: String,
    pub action: String,
    pub note: Option<String>,
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.reason.clone())
            .collect()
    }

    pub fn recorded(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().unwrap().push(RecordedEvent {
            object: resource_ref.name.clone().unwrap_or_default(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

/// Instance tagged as belonging to `machine_name` in the test cluster
pub fn tagged_instance(id: &str, machine_name: &str, state: InstanceState, launched: Option<DateTime<Utc>>) -> Instance {
    let mut instance = Instance::new(id, state);
    instance.launch_time = launched;
    instance.instance_type = Some("m5.large".to_string());
    instance.availability_zone = Some("us-east-1a".to_string());
    instance.private_ip_address = Some("10.0.1.10".to_string());
    instance.tags = BTreeMap::from([
        ("Name".to_string(), machine_name.to_string()),
        ("clusterid".to_string(), CLUSTER_NAME.to_string()),
    ]);
    instance
}

pub fn provider_spec() -> serde_json::Value {
    json!({
        "ami": {"id": "ami-123"},
        "instanceType": "m5.large",
        "subnet": {"id": "subnet-1"},
        "placement": {"region": "us-east-1", "availabilityZone": "us-east-1a"},
        "securityGroups": [{"id": "sg-core"}]
    })
}

pub fn machine_with_spec(name: &str, value: serde_json::Value) -> Machine {
    let mut machine = Machine::new(
        name,
        MachineSpec {
            provider_spec: ProviderSpec { value: Some(value) },
            ..Default::default()
        },
    );
    machine.metadata.namespace = Some(NAMESPACE.to_string());
    machine.metadata.labels = Some(BTreeMap::from([(
        CLUSTER_ID_LABEL.to_string(),
        CLUSTER_NAME.to_string(),
    )]));
    machine
}

pub fn machine(name: &str) -> Machine {
    machine_with_spec(name, provider_spec())
}

pub fn cluster() -> Cluster {
    let mut cluster = Cluster::new(CLUSTER_NAME, ClusterSpec::default());
    cluster.metadata.namespace = Some(NAMESPACE.to_string());
    cluster.metadata.uid = Some("cluster-uid".to_string());
    cluster
}
