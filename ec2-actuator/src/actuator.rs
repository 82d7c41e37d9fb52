//! The machine actuator
//!
//! [`Actuator`] turns the four lifecycle verbs the external controller
//! dispatches (create, update, delete, exists/describe) into cloud calls.
//! Every verb is safe to repeat: instance identity comes from tags, additive
//! state from annotations, and duplicates are resolved by launch time.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use ec2_actuator_models::{
    Cluster, Machine, ProviderConfig, ProviderStatus, INSTANCE_TYPE_LABEL, INTERRUPTIBLE_INSTANCE_LABEL,
    REGION_LABEL, ZONE_LABEL,
};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{error, info, warn};

use crate::cloud::{
    ClientScope, CloudClient, CloudClientBuilder, Credentials, Instance, InstanceLifecycle, InstanceState,
};
use crate::config::ActuatorConfig;
use crate::error::{Error, Result};
use crate::events::{actions, reasons, EventPublisher};
use crate::init_lock::{ControlPlaneInitLocker, LockOutcome};
use crate::instances::{self, StateFilter};
use crate::launch::{self, LaunchRequest};
use crate::load_balancers::{deregister_from_load_balancers, register_with_load_balancers};
use crate::metrics::{self, Operation};
use crate::names::{annotations, secrets};
use crate::security_groups::ensure_security_groups;
use crate::status;
use crate::store::MachineStore;
use crate::tags::ensure_tags;

/// Constructor dependencies of an [`Actuator`]
pub struct ActuatorParams {
    pub store: Arc<dyn MachineStore>,
    pub client_builder: Arc<dyn CloudClientBuilder>,
    pub events: Arc<dyn EventPublisher>,
    pub config: ActuatorConfig,
}

/// How a machine should bootstrap into its cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapMode {
    /// Initialize a new control plane; the token is stable across retries
    Init { token: String },
    /// Join the existing control plane
    Join,
}

pub struct Actuator {
    store: Arc<dyn MachineStore>,
    client_builder: Arc<dyn CloudClientBuilder>,
    events: Arc<dyn EventPublisher>,
    config: ActuatorConfig,
    locker: ControlPlaneInitLocker,
}

/// Machine name, cluster id and decoded provider config
struct MachineContext {
    name: String,
    cluster_id: String,
    provider_config: ProviderConfig,
}

impl Actuator {
    pub fn new(params: ActuatorParams) -> Self {
        let locker = ControlPlaneInitLocker::new(params.store.clone(), params.config.clone());
        Self {
            store: params.store,
            client_builder: params.client_builder,
            events: params.events,
            config: params.config,
            locker,
        }
    }

    // ========================================================================
    // Lifecycle verbs
    // ========================================================================

    /// Launch an instance for the machine.
    ///
    /// A failure before the instance exists is recorded as a creation-failed
    /// condition on the machine before being returned.
    pub async fn create(&self, _cluster: &Cluster, machine: &mut Machine) -> Result<()> {
        info!(machine = %machine.name_any(), "Creating machine");
        let result = self.create_machine(machine).await;
        self.report_failure(machine, Operation::Create, result).await
    }

    async fn create_machine(&self, machine: &mut Machine) -> Result<()> {
        let (context, client, instance) = match self.launch(machine).await {
            Ok(launched) => launched,
            Err(err) => {
                self.record_creation_failure(machine, &err).await;
                return Err(err);
            }
        };
        self.publish(
            machine,
            EventType::Normal,
            reasons::CREATED,
            actions::CREATE,
            format!("Created Machine {}", context.name),
        )
        .await;

        let registered =
            register_with_load_balancers(client.as_ref(), &context.provider_config.load_balancers, &instance)
                .await;

        let mut updated = machine.clone();
        if set_provider_specifics(&mut updated, &instance, &context.provider_config.placement.region) {
            *machine = self.store.update_machine(&updated).await?;
        }

        let status_result = self.update_status(machine, Some(&instance)).await;
        registered?;
        status_result
    }

    /// Converge the machine's instance: drop duplicates, re-register load
    /// balancers, reconcile additive tags and security groups, refresh status.
    pub async fn update(&self, _cluster: &Cluster, machine: &mut Machine) -> Result<()> {
        info!(machine = %machine.name_any(), "Updating machine");
        let result = self.update_machine(machine).await;
        self.report_failure(machine, Operation::Update, result).await
    }

    async fn update_machine(&self, machine: &mut Machine) -> Result<()> {
        let context = self.context(machine)?;
        let client = self.client_for(machine, &context.provider_config).await?;

        let found =
            instances::instances_for_machine(client.as_ref(), &context.name, &context.cluster_id, StateFilter::Active)
                .await?;

        let Some(selection) = instances::select_newest(found) else {
            self.check_eventual_consistency(machine)?;
            warn!(machine = %context.name, "Found no instance for machine");
            self.update_status(machine, None).await?;
            return Err(Error::update(format!("found no instance for machine {}", context.name)));
        };

        if !selection.others.is_empty() {
            warn!(
                machine = %context.name,
                keeping = %selection.newest.instance_id,
                duplicates = selection.others.len(),
                "Found duplicate instances, terminating all but the newest"
            );
            instances::terminate_instances(client.as_ref(), &selection.others)
                .await
                .map_err(|e| Error::update(format!("failed to terminate duplicate instances: {}", e)))?;
        }
        let instance = selection.newest;

        let mut errors = Vec::new();
        if let Err(err) =
            register_with_load_balancers(client.as_ref(), &context.provider_config.load_balancers, &instance).await
        {
            errors.push(err);
        }

        let mut updated = machine.clone();
        let mut metadata_changed =
            set_provider_specifics(&mut updated, &instance, &context.provider_config.placement.region);
        match ensure_tags(
            client.as_ref(),
            &mut updated,
            &instance.instance_id,
            &context.provider_config.additional_tags,
        )
        .await
        {
            Ok(changed) => metadata_changed |= changed,
            Err(err) => errors.push(err),
        }
        match ensure_security_groups(
            client.as_ref(),
            &mut updated,
            &instance,
            &context.provider_config.additional_security_groups,
        )
        .await
        {
            Ok(changed) => metadata_changed |= changed,
            Err(err) => errors.push(err),
        }
        if metadata_changed {
            *machine = self.store.update_machine(&updated).await?;
        }
        if errors.is_empty() {
            self.publish(
                machine,
                EventType::Normal,
                reasons::UPDATED,
                actions::UPDATE,
                format!("Updated machine {}", context.name),
            )
            .await;
        }

        let status_result = self.update_status(machine, Some(&instance)).await;
        if let Some(err) = Error::aggregate(errors) {
            return Err(err);
        }
        status_result
    }

    /// Terminate every running or pending instance of the machine and take
    /// them out of its network load balancers. Nothing to terminate counts as
    /// success.
    pub async fn delete(&self, _cluster: &Cluster, machine: &mut Machine) -> Result<()> {
        info!(machine = %machine.name_any(), "Deleting machine");
        let result = self.delete_machine(machine).await;
        if result.is_ok() {
            let note = format!("Deleted machine {}", machine.name_any());
            self.publish(machine, EventType::Normal, reasons::DELETED, actions::DELETE, note)
                .await;
        }
        self.report_failure(machine, Operation::Delete, result).await
    }

    async fn delete_machine(&self, machine: &mut Machine) -> Result<()> {
        let context = self.context(machine)?;
        let client = self.client_for(machine, &context.provider_config).await?;

        let found =
            instances::instances_for_machine(client.as_ref(), &context.name, &context.cluster_id, StateFilter::Active)
                .await?;
        if found.is_empty() {
            warn!(machine = %context.name, "No instances found to delete");
            return Ok(());
        }

        let changes = instances::terminate_instances(client.as_ref(), &found)
            .await
            .map_err(|e| Error::delete(format!("failed to terminate instances: {}", e)))?;

        let deregistered =
            deregister_from_load_balancers(client.as_ref(), &context.provider_config.load_balancers, &found).await;

        if let [change] = changes.as_slice() {
            let mut updated = machine.clone();
            if set_instance_state(&mut updated, change.current_state) {
                *machine = self.store.update_machine(&updated).await?;
            }
        }
        deregistered
    }

    /// Whether a running or pending instance backs the machine
    pub async fn exists(&self, cluster: &Cluster, machine: &Machine) -> Result<bool> {
        Ok(self.describe(cluster, machine).await?.is_some())
    }

    /// The canonical running or pending instance, if any. Duplicates are
    /// tolerated here and cleaned up by [`Actuator::update`].
    pub async fn describe(&self, _cluster: &Cluster, machine: &Machine) -> Result<Option<Instance>> {
        let context = self.context(machine)?;
        let client = self.client_for(machine, &context.provider_config).await?;

        let found =
            instances::instances_for_machine(client.as_ref(), &context.name, &context.cluster_id, StateFilter::Active)
                .await?;
        match instances::select_newest(found) {
            Some(selection) => Ok(Some(selection.newest)),
            None => {
                self.check_eventual_consistency(machine)?;
                info!(machine = %context.name, "Instance does not exist");
                Ok(None)
            }
        }
    }

    /// Decide whether the machine initializes the control plane or joins it.
    ///
    /// Machines that must wait get [`Error::RequeueAfter`].
    pub async fn bootstrap_mode(&self, cluster: &Cluster, machine: &Machine) -> Result<BootstrapMode> {
        let ready = cluster
            .annotations()
            .get(annotations::CONTROL_PLANE_READY)
            .map(String::as_str)
            == Some("true");
        if ready {
            return Ok(BootstrapMode::Join);
        }

        if !machine.is_control_plane() {
            info!(machine = %machine.name_any(), "Waiting for the control plane before joining");
            return Err(Error::RequeueAfter(self.config.control_plane_wait));
        }

        match self.locker.acquire_with_token(cluster, machine).await {
            LockOutcome::Acquired { token } => Ok(BootstrapMode::Init { token }),
            LockOutcome::NotAcquired => {
                info!(machine = %machine.name_any(), "Another machine is initializing the control plane");
                Err(Error::RequeueAfter(self.config.control_plane_wait))
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Count and announce a failed verb. Deliberate requeues are not failures.
    async fn report_failure(&self, machine: &Machine, operation: Operation, result: Result<()>) -> Result<()> {
        let err = match result {
            Err(err) if err.requeue_after().is_none() => err,
            other => return other,
        };

        let name = machine.name_any();
        let namespace = machine.namespace().unwrap_or_default();
        error!(machine = %name, operation = operation.as_str(), error = %err, "Machine operation failed");
        metrics::record_failure(operation, &name, &namespace, &format!("{:?}", err.kind()));

        let (reason, action) = match operation {
            Operation::Create => (reasons::FAILED_CREATE, actions::CREATE),
            Operation::Update => (reasons::FAILED_UPDATE, actions::UPDATE),
            Operation::Delete => (reasons::FAILED_DELETE, actions::DELETE),
        };
        self.publish(machine, EventType::Warning, reason, action, err.to_string())
            .await;
        Err(err)
    }

    async fn publish(&self, machine: &Machine, type_: EventType, reason: &str, action: &str, note: String) {
        self.events
            .publish(&machine.object_ref(&()), type_, reason, action, Some(note))
            .await;
    }

    fn context(&self, machine: &Machine) -> Result<MachineContext> {
        let name = machine.name_any();
        let cluster_id = machine
            .cluster_id()
            .ok_or_else(|| Error::invalid_configuration(format!("{}: missing cluster id label", name)))?
            .to_string();
        let provider_config = ProviderConfig::from_machine(machine).map_err(|e| {
            Error::invalid_configuration(format!("error decoding provider config: {}", e))
        })?;
        Ok(MachineContext {
            name,
            cluster_id,
            provider_config,
        })
    }

    async fn client_for(&self, machine: &Machine, config: &ProviderConfig) -> Result<Arc<dyn CloudClient>> {
        let credentials = match &config.credentials_secret {
            Some(secret) => Some(self.credentials(machine, &secret.name).await?),
            None => None,
        };
        let scope = ClientScope {
            region: config.placement.region.clone(),
            credentials,
        };
        Ok(self.client_builder.build(&scope)?)
    }

    async fn credentials(&self, machine: &Machine, secret_name: &str) -> Result<Credentials> {
        let namespace = machine.namespace().unwrap_or_default();
        let data = self.store.get_secret(&namespace, secret_name).await.map_err(|err| {
            if err.is_not_found() {
                Error::invalid_configuration(format!(
                    "credentials secret {}/{} not found",
                    namespace, secret_name
                ))
            } else {
                err.into()
            }
        })?;

        let value = |key: &str| -> Result<String> {
            data.get(key)
                .map(|bytes| String::from_utf8_lossy(bytes).trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| {
                    Error::invalid_configuration(format!(
                        "credentials secret {}/{} has no {} key",
                        namespace, secret_name, key
                    ))
                })
        };

        Ok(Credentials {
            access_key_id: value(secrets::ACCESS_KEY_ID)?,
            secret_access_key: value(secrets::SECRET_ACCESS_KEY)?,
        })
    }

    async fn user_data(&self, machine: &Machine, config: &ProviderConfig) -> Result<Vec<u8>> {
        let Some(secret) = &config.user_data_secret else {
            return Ok(Vec::new());
        };
        let namespace = machine.namespace().unwrap_or_default();
        let key = &self.config.user_data_secret_key;

        let data = self.store.get_secret(&namespace, &secret.name).await.map_err(|err| {
            if err.is_not_found() {
                Error::invalid_configuration(format!(
                    "user data secret {}/{} not found",
                    namespace, secret.name
                ))
            } else {
                Error::create(format!("error getting user data secret {}: {}", secret.name, err))
            }
        })?;

        data.get(key.as_str()).cloned().ok_or_else(|| {
            Error::invalid_configuration(format!(
                "secret {}/{} does not have {:?} field set",
                namespace, secret.name, key
            ))
        })
    }

    /// Everything from config resolution up to the run request
    async fn launch(&self, machine: &Machine) -> Result<(MachineContext, Arc<dyn CloudClient>, Instance)> {
        let context = self.context(machine)?;
        let client = self.client_for(machine, &context.provider_config).await?;

        if !machine.is_control_plane() {
            instances::remove_stopped_instances(client.as_ref(), &context.name, &context.cluster_id)
                .await
                .map_err(|e| Error::create(format!("unable to remove stopped machines: {}", e)))?;
        }

        let user_data = self.user_data(machine, &context.provider_config).await?;
        let instance = launch::launch_instance(
            client.as_ref(),
            LaunchRequest {
                machine_name: &context.name,
                cluster_id: &context.cluster_id,
                config: &context.provider_config,
                user_data: &user_data,
            },
        )
        .await?;

        Ok((context, client, instance))
    }

    async fn record_creation_failure(&self, machine: &mut Machine, err: &Error) {
        let mut provider_status = ProviderStatus::from_machine(machine).unwrap_or_default();
        status::observe_creation_failure(&mut provider_status, err);
        if let Err(write_err) = status::write_status(self.store.as_ref(), machine, &provider_status, None).await {
            error!(
                machine = %machine.name_any(),
                error = %write_err,
                "Failed to record creation failure"
            );
        }
    }

    /// Recompute and write status. A pending instance asks to be polled again.
    async fn update_status(&self, machine: &mut Machine, instance: Option<&Instance>) -> Result<()> {
        let mut provider_status = ProviderStatus::from_machine(machine)
            .map_err(|e| Error::serialization("provider status", e))?;
        let addresses = status::observe_instance(&mut provider_status, instance);
        status::write_status(self.store.as_ref(), machine, &provider_status, Some(addresses)).await?;

        if instance.map(|i| i.state) == Some(InstanceState::Pending) {
            info!(machine = %machine.name_any(), "Instance is pending, requeueing");
            return Err(Error::RequeueAfter(self.config.requeue_after));
        }
        Ok(())
    }

    /// A freshly recorded instance may not show up in describe calls yet.
    /// Within the requeue window of the last status write, ask for a retry
    /// instead of concluding it is gone.
    fn check_eventual_consistency(&self, machine: &Machine) -> Result<()> {
        let recorded = ProviderStatus::from_machine(machine)
            .ok()
            .and_then(|s| s.instance_id)
            .is_some();
        if !recorded {
            return Ok(());
        }

        let last_updated = machine.status.as_ref().and_then(|s| s.last_updated.as_ref());
        let window = chrono::Duration::from_std(self.config.requeue_after).unwrap_or(chrono::Duration::zero());
        let recent = match last_updated {
            Some(time) => time.0 + window > Utc::now(),
            None => true,
        };
        if recent {
            info!(
                machine = %machine.name_any(),
                "Possible eventual-consistency discrepancy; returning an error to requeue"
            );
            return Err(Error::RequeueAfter(self.config.requeue_after));
        }
        Ok(())
    }
}

/// Stamp what the cloud reports about the instance onto the machine: state
/// annotation, provider id, and placement labels. Spot instances are also
/// marked interruptible on the labels propagated to their node. Returns
/// whether anything changed.
fn set_provider_specifics(machine: &mut Machine, instance: &Instance, region: &str) -> bool {
    let before = machine.clone();
    set_instance_state(machine, instance.state);

    let zone = instance.availability_zone.as_deref().unwrap_or_default();
    machine.spec.provider_id = Some(format!("aws:///{}/{}", zone, instance.instance_id));

    let labels = machine.labels_mut();
    labels.insert(REGION_LABEL.to_string(), region.to_string());
    if let Some(zone) = &instance.availability_zone {
        labels.insert(ZONE_LABEL.to_string(), zone.clone());
    }
    if let Some(instance_type) = &instance.instance_type {
        labels.insert(INSTANCE_TYPE_LABEL.to_string(), instance_type.clone());
    }
    if instance.lifecycle == InstanceLifecycle::Spot {
        labels.insert(INTERRUPTIBLE_INSTANCE_LABEL.to_string(), String::new());
        machine
            .spec
            .metadata
            .labels
            .insert(INTERRUPTIBLE_INSTANCE_LABEL.to_string(), String::new());
    }

    *machine != before
}

/// Record the observed instance state. Returns whether the annotation changed.
fn set_instance_state(machine: &mut Machine, state: InstanceState) -> bool {
    let map = machine.metadata.annotations.get_or_insert_with(BTreeMap::new);
    let value = state.as_str();
    if map.get(annotations::INSTANCE_STATE).map(String::as_str) == Some(value) {
        return false;
    }
    map.insert(annotations::INSTANCE_STATE.to_string(), value.to_string());
    true
}
