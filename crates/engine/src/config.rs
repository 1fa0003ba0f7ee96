use std::str::FromStr;
use std::time::Duration;

use pulse_core::labels;
use serde::{Deserialize, Serialize};

/// Label and naming conventions the handlers filter on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    pub system_namespace: String,
    pub sso_name: String,
    pub enabled_label: String,
    pub component_label: String,
    pub managed_label: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            system_namespace: labels::SYSTEM_NAMESPACE.to_string(),
            sso_name: labels::SSO_NAME.to_string(),
            enabled_label: labels::ENABLED.to_string(),
            component_label: labels::COMPONENT.to_string(),
            managed_label: labels::MANAGED.to_string(),
        }
    }
}

/// Runtime knobs of a [`crate::Watcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Outbound queue bound; the oldest message is dropped beyond it.
    pub sink_capacity: usize,
    /// Per-kind buffer between the source and its dispatch task.
    pub subscription_buffer: usize,
    /// How long `stop` waits for tasks before aborting them.
    pub stop_grace: Duration,
    /// Upper bound on establishing one kind's subscription.
    pub setup_timeout: Duration,
    pub policy: Policy,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            sink_capacity: 2048,
            subscription_buffer: 256,
            stop_grace: Duration::from_millis(2000),
            setup_timeout: Duration::from_millis(10_000),
            policy: Policy::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse::<T>().ok())
}

impl WatchConfig {
    /// Defaults overridden by `PULSE_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut policy = d.policy;
        if let Ok(ns) = std::env::var("PULSE_SYSTEM_NAMESPACE") {
            if !ns.is_empty() { policy.system_namespace = ns; }
        }
        if let Ok(name) = std::env::var("PULSE_SSO_NAME") {
            if !name.is_empty() { policy.sso_name = name; }
        }
        Self {
            sink_capacity: env_parse("PULSE_SINK_CAP").unwrap_or(d.sink_capacity).max(1),
            subscription_buffer: env_parse("PULSE_SUB_BUFFER").unwrap_or(d.subscription_buffer).max(1),
            stop_grace: env_parse::<u64>("PULSE_STOP_GRACE_MS").map(Duration::from_millis).unwrap_or(d.stop_grace),
            setup_timeout: env_parse::<u64>("PULSE_SETUP_TIMEOUT_MS").map(Duration::from_millis).unwrap_or(d.setup_timeout),
            policy,
        }
    }
}
