//! Flow manager configuration.

use crate::arena::MAX_SLOTS;
use crate::error::{FlowError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the flow manager and its scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowManagerConfig {
    /// Interval between maintenance passes in milliseconds
    #[serde(default = "default_update_interval")]
    pub update_interval_ms: u64,

    /// Maximum number of offloaded flows
    #[serde(default = "default_max_flows")]
    pub max_flows: usize,

    /// Depth of the intake event queue
    #[serde(default = "default_event_queue_depth")]
    pub event_queue_depth: usize,
}

fn default_update_interval() -> u64 {
    1000
}

fn default_max_flows() -> usize {
    65536
}

fn default_event_queue_depth() -> usize {
    1024
}

impl Default for FlowManagerConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval(),
            max_flows: default_max_flows(),
            event_queue_depth: default_event_queue_depth(),
        }
    }
}

impl FlowManagerConfig {
    /// Parses a `[flow]`-style TOML table.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| FlowError::Configuration(format!("Failed to parse flow config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Get the maintenance interval as Duration
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.update_interval_ms == 0 {
            return Err(FlowError::Configuration(
                "update_interval_ms must be > 0".to_string(),
            ));
        }

        if self.max_flows == 0 {
            return Err(FlowError::Configuration("max_flows must be > 0".to_string()));
        }

        if self.max_flows > MAX_SLOTS {
            return Err(FlowError::Configuration(format!(
                "max_flows must be <= {}",
                MAX_SLOTS
            )));
        }

        if self.event_queue_depth == 0 {
            return Err(FlowError::Configuration(
                "event_queue_depth must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
