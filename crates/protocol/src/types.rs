use std::fmt;

use serde::{Deserialize, Serialize};

/// Synchronous answer to a `start()` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    FailedAlreadyInProgress,
    FailedInvalidParameters,
    FailedInvalidData,
    FailedToCommence,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::FailedAlreadyInProgress => "another operation is already in progress",
            Self::FailedInvalidParameters => "invalid parameters",
            Self::FailedInvalidData => "invalid data",
            Self::FailedToCommence => "failed to commence",
        };
        f.write_str(s)
    }
}

/// The device connection an engine is initialized against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionTarget {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ConnectionTarget {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} ({})", self.device_id),
            None => f.write_str(&self.device_id),
        }
    }
}

/// How a freshly uploaded image is activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    /// Mark for a test boot; the image reverts unless confirmed afterwards.
    TestOnly,
    /// Confirm without a test boot.
    ConfirmOnly,
    #[default]
    TestAndConfirm,
}
