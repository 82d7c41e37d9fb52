//! Kubernetes-backed [`MachineStore`]

use std::collections::BTreeMap;

use async_trait::async_trait;
use ec2_actuator_models::{Cluster, Machine, ProviderStatus};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde_json::{json, Map, Value};

use super::{LockRecord, MachineStore, StoreError, StoreResult};
use crate::names::LOCK_INFORMATION_KEY;

const FIELD_MANAGER: &str = "ec2-actuator";

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn machines(&self, namespace: &str) -> Api<Machine> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Translate API status codes into the store's distinguishable errors
fn map_api_error(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => StoreError::Kube(other),
    }
}

/// Merge patch for the fields the actuator writes outside of status: labels,
/// annotations, provider id and the labels propagated to the node
fn machine_patch(machine: &Machine) -> Value {
    json!({
        "metadata": {
            "resourceVersion": machine.resource_version(),
            "labels": machine.labels(),
            "annotations": machine.annotations(),
        },
        "spec": {
            "providerID": machine.spec.provider_id,
            "metadata": {
                "labels": machine.spec.metadata.labels,
            },
        },
    })
}

/// Merge patch for the status subresource. A merge patch leaves omitted keys
/// untouched, so every status field is sent and cleared ones go out as null.
fn status_patch(machine: &Machine) -> Value {
    let status = machine.status.clone().unwrap_or_default();
    let mut provider_status = match status.provider_status {
        Some(Value::Object(fields)) => fields,
        _ => Map::new(),
    };
    for field in ProviderStatus::FIELDS {
        provider_status.entry(field).or_insert(Value::Null);
    }

    json!({
        "status": {
            "addresses": status.addresses,
            "lastUpdated": status.last_updated,
            "providerStatus": provider_status,
        }
    })
}

#[async_trait]
impl MachineStore for KubeStore {
    async fn update_machine(&self, machine: &Machine) -> StoreResult<Machine> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        let patch = machine_patch(machine);

        self.machines(&namespace)
            .patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_api_error(e, "Machine", &namespace, &name))
    }

    async fn update_machine_status(&self, machine: &Machine) -> StoreResult<Machine> {
        let namespace = machine.namespace().unwrap_or_default();
        let name = machine.name_any();
        let patch = status_patch(machine);

        self.machines(&namespace)
            .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_api_error(e, "Machine", &namespace, &name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> StoreResult<BTreeMap<String, Vec<u8>>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get(name)
            .await
            .map_err(|e| map_api_error(e, "Secret", namespace, name))?;

        Ok(secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(key, value)| (key, value.0))
            .collect())
    }

    async fn get_lock_record(&self, namespace: &str, name: &str) -> StoreResult<LockRecord> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = config_maps
            .get(name)
            .await
            .map_err(|e| map_api_error(e, "ConfigMap", namespace, name))?;

        let payload = config_map
            .data
            .as_ref()
            .and_then(|data| data.get(LOCK_INFORMATION_KEY))
            .ok_or_else(|| {
                StoreError::Other(format!(
                    "lock record {}/{} has no {} entry",
                    namespace, name, LOCK_INFORMATION_KEY
                ))
            })?;

        Ok(serde_json::from_str(payload)?)
    }

    async fn create_lock_record(
        &self,
        namespace: &str,
        name: &str,
        record: &LockRecord,
        owner: &Cluster,
    ) -> StoreResult<()> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                owner_references: owner.controller_owner_ref(&()).map(|owner_ref| vec![owner_ref]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                LOCK_INFORMATION_KEY.to_string(),
                serde_json::to_string(record)?,
            )])),
            ..Default::default()
        };

        config_maps
            .create(&PostParams::default(), &config_map)
            .await
            .map_err(|e| map_api_error(e, "ConfigMap", namespace, name))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::machine;
    use ec2_actuator_models::{MachineStatus, INTERRUPTIBLE_INSTANCE_LABEL, ZONE_LABEL};

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} test", reason),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_api_errors_map_to_store_errors() {
        assert!(matches!(
            map_api_error(api_error(404, "NotFound"), "Secret", "default", "creds"),
            StoreError::NotFound { kind: "Secret", .. }
        ));
        assert!(matches!(
            map_api_error(api_error(409, "AlreadyExists"), "ConfigMap", "default", "c-lock"),
            StoreError::AlreadyExists { kind: "ConfigMap", .. }
        ));
        assert!(matches!(
            map_api_error(api_error(409, "Conflict"), "Machine", "default", "m1"),
            StoreError::Conflict { kind: "Machine", .. }
        ));
        assert!(matches!(
            map_api_error(api_error(500, "InternalError"), "Machine", "default", "m1"),
            StoreError::Kube(_)
        ));
    }

    #[test]
    fn test_not_found_keeps_object_identity() {
        match map_api_error(api_error(404, "NotFound"), "Secret", "team-a", "creds") {
            StoreError::NotFound { namespace, name, .. } => {
                assert_eq!(namespace, "team-a");
                assert_eq!(name, "creds");
            }
            other => panic!("expected not found, got {other:?}"),
        }
    }

    #[test]
    fn test_cleared_status_is_sent_as_null() {
        let mut m = machine("m1");
        m.status = Some(MachineStatus::default());

        let patch = status_patch(&m);
        assert_eq!(patch["status"]["addresses"], json!([]));
        assert_eq!(patch["status"]["lastUpdated"], Value::Null);
        for field in ProviderStatus::FIELDS {
            let provider_status = patch["status"]["providerStatus"].as_object().unwrap();
            assert_eq!(provider_status.get(field), Some(&Value::Null), "{field}");
        }
    }

    #[test]
    fn test_status_patch_keeps_set_fields() {
        let mut m = machine("m1");
        m.status = Some(MachineStatus {
            provider_status: Some(json!({"instanceId": "i-1", "instanceState": "running"})),
            ..Default::default()
        });

        let provider_status = status_patch(&m)["status"]["providerStatus"].clone();
        assert_eq!(provider_status["instanceId"], "i-1");
        assert_eq!(provider_status["instanceState"], "running");
        assert_eq!(provider_status["conditions"], Value::Null);
    }

    #[test]
    fn test_machine_patch_carries_labels_and_provider_id() {
        let mut m = machine("m1");
        m.metadata.resource_version = Some("42".to_string());
        m.labels_mut().insert(ZONE_LABEL.to_string(), "us-east-1a".to_string());
        m.annotations_mut()
            .insert("machine.openshift.io/instance-state".to_string(), "running".to_string());
        m.spec.provider_id = Some("aws:///us-east-1a/i-1".to_string());
        m.spec
            .metadata
            .labels
            .insert(INTERRUPTIBLE_INSTANCE_LABEL.to_string(), String::new());

        let patch = machine_patch(&m);
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert_eq!(patch["metadata"]["labels"][ZONE_LABEL], "us-east-1a");
        assert_eq!(
            patch["metadata"]["annotations"]["machine.openshift.io/instance-state"],
            "running"
        );
        assert_eq!(patch["spec"]["providerID"], "aws:///us-east-1a/i-1");
        assert_eq!(patch["spec"]["metadata"]["labels"][INTERRUPTIBLE_INSTANCE_LABEL], "");
    }
}
