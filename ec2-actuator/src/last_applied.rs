//! Last-applied state recorded in a Machine annotation
//!
//! The annotation holds a JSON object of what the actuator itself applied on
//! its previous pass. Entries on the cloud resource that never appear here
//! are someone else's and are left alone.

use std::collections::BTreeMap;

use ec2_actuator_models::Machine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LastApplied<V> {
    entries: BTreeMap<String, V>,
}

impl<V> Default for LastApplied<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

/// Marker value; serializes as `{}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Present {}

/// Tag key to value
pub type AppliedTags = LastApplied<String>;
/// Security group id to marker
pub type AppliedSecurityGroups = LastApplied<Present>;

impl<V> LastApplied<V>
where
    V: Serialize + DeserializeOwned + PartialEq,
{
    /// Read from the machine; an absent annotation is an empty record
    pub fn from_annotation(machine: &Machine, key: &str) -> Result<Self> {
        match machine.annotation(key) {
            Some(raw) if !raw.is_empty() => {
                serde_json::from_str(raw).map_err(|e| Error::serialization("last-applied annotation", e))
            }
            _ => Ok(Self::default()),
        }
    }

    /// Store on the machine. Returns whether the annotation changed.
    pub fn write_to(&self, machine: &mut Machine, key: &str) -> Result<bool> {
        let encoded =
            serde_json::to_string(self).map_err(|e| Error::serialization("last-applied annotation", e))?;
        let annotations = machine.metadata.annotations.get_or_insert_with(BTreeMap::new);
        if annotations.get(key) == Some(&encoded) {
            return Ok(false);
        }
        annotations.insert(key.to_string(), encoded);
        Ok(true)
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<V> FromIterator<(String, V)> for LastApplied<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
