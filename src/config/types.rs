use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::command::encoder::SettleClass;
use crate::device::constants::{CONTINUOUS_SETTLE, DISCRETE_SETTLE, WRITE_DEADLINE};

/// What the session does when an established connection drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReconnectPolicy {
    /// Stay failed until the user selects a device again.
    Manual,
    /// Forget the discovered devices and start scanning again.
    Rescan,
}

impl std::fmt::Display for ReconnectPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let result = match self {
            ReconnectPolicy::Manual => "manual",
            ReconnectPolicy::Rescan => "rescan",
        };

        write!(f, "{}", result)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub continuous_settle_ms: u64,
    pub discrete_settle_ms: u64,
    pub write_deadline_ms: u64,
    pub reconnect: ReconnectPolicy,
    pub name_filter: Option<String>,
}

impl Config {
    pub fn settle_interval(&self, class: SettleClass) -> Duration {
        match class {
            SettleClass::Continuous => Duration::from_millis(self.continuous_settle_ms),
            SettleClass::Discrete => Duration::from_millis(self.discrete_settle_ms),
            SettleClass::Immediate => Duration::ZERO,
        }
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }

    pub fn accepts_name(&self, name: &str) -> bool {
        match &self.name_filter {
            None => true,
            Some(filter) => name.to_lowercase().contains(&filter.to_lowercase()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            continuous_settle_ms: CONTINUOUS_SETTLE,
            discrete_settle_ms: DISCRETE_SETTLE,
            write_deadline_ms: WRITE_DEADLINE,
            reconnect: ReconnectPolicy::Manual,
            name_filter: None,
        }
    }
}
