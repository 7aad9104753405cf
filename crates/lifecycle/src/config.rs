//! Controller configuration.
//!
//! Read from a JSON file; every field is optional and falls back to its
//! default, so an empty object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};
use smpflow_protocol::constants::{MAX_MTU, MIN_EFFECTIVE_WINDOW, MIN_MTU};
use smpflow_transfer::validate_memory_alignment;

use crate::error::ConfigError;

fn default_window_capacity() -> u32 {
    3
}

fn default_memory_alignment() -> u32 {
    4
}

fn default_event_queue_warn_depth() -> usize {
    1024
}

/// Tunables shared by every controller built from the same config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// MTU hint handed to engine initialization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_mtu: Option<u16>,

    /// Packets sent before waiting for an acknowledgment (upload/install).
    #[serde(default = "default_window_capacity")]
    pub window_capacity: u32,

    /// Byte alignment of pipelined chunks (upload/install).
    #[serde(default = "default_memory_alignment")]
    pub memory_alignment: u32,

    /// Queue depth at which the dispatcher warns that observers lag behind.
    #[serde(default = "default_event_queue_warn_depth")]
    pub event_queue_warn_depth: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            initial_mtu: None,
            window_capacity: default_window_capacity(),
            memory_alignment: default_memory_alignment(),
            event_queue_warn_depth: default_event_queue_warn_depth(),
        }
    }
}

impl LifecycleConfig {
    /// Loads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Parses and validates a JSON config.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(mtu) = self.initial_mtu
            && !(MIN_MTU..=MAX_MTU).contains(&mtu)
        {
            return Err(ConfigError::Invalid(format!(
                "MTU {mtu} outside [{MIN_MTU}, {MAX_MTU}]"
            )));
        }

        validate_memory_alignment(self.memory_alignment)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.window_capacity >= MIN_EFFECTIVE_WINDOW && self.memory_alignment < 2 {
            return Err(ConfigError::Invalid(format!(
                "window capacity {} needs a byte alignment of at least 2",
                self.window_capacity
            )));
        }

        if self.event_queue_warn_depth == 0 {
            return Err(ConfigError::Invalid(
                "event queue warn depth must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Window capacity as handed to the engine; `None` means engine default.
    pub fn effective_window(&self) -> Option<u32> {
        (self.window_capacity >= MIN_EFFECTIVE_WINDOW).then_some(self.window_capacity)
    }

    /// Byte alignment as handed to the engine; `None` means engine default.
    pub fn effective_alignment(&self) -> Option<u32> {
        (self.memory_alignment >= MIN_EFFECTIVE_WINDOW).then_some(self.memory_alignment)
    }
}
