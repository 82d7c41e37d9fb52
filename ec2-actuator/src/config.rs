//! Actuator configuration

use std::time::Duration;

use anyhow::{Context, Result};

use crate::names;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorConfig {
    /// Short-poll delay while an instance is pending, and the grace window
    /// during which a freshly recorded instance may be missing from describe
    pub requeue_after: Duration,
    /// Delay returned while a machine waits for the control plane to come up
    pub control_plane_wait: Duration,
    /// Key of the user-data payload in the user-data secret
    pub user_data_secret_key: String,
    /// Lock record name is `<cluster-name><lock_suffix>`
    pub lock_suffix: String,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_secs(20),
            control_plane_wait: Duration::from_secs(15),
            user_data_secret_key: names::secrets::USER_DATA.to_string(),
            lock_suffix: "-lock".to_string(),
        }
    }
}

impl ActuatorConfig {
    /// Load from the environment (and `.env`), falling back to defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset keys keep their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let seconds = |key: &str, default: Duration| -> Result<Duration> {
            match lookup(key) {
                Some(value) => Ok(Duration::from_secs(
                    value
                        .parse()
                        .with_context(|| format!("{} must be a number of seconds", key))?,
                )),
                None => Ok(default),
            }
        };

        Ok(Self {
            requeue_after: seconds("EC2_ACTUATOR_REQUEUE_AFTER_SECONDS", defaults.requeue_after)?,
            control_plane_wait: seconds(
                "EC2_ACTUATOR_CONTROL_PLANE_WAIT_SECONDS",
                defaults.control_plane_wait,
            )?,
            user_data_secret_key: lookup("EC2_ACTUATOR_USER_DATA_SECRET_KEY")
                .unwrap_or(defaults.user_data_secret_key),
            lock_suffix: lookup("EC2_ACTUATOR_LOCK_SUFFIX").unwrap_or(defaults.lock_suffix),
        })
    }

    pub fn lock_name(&self, cluster_name: &str) -> String {
        format!("{}{}", cluster_name, self.lock_suffix)
    }
}
