//! Engine failures and the global error-code space.
//!
//! Two code domains come back from device firmware: a flat code space
//! (authentication and generic errors, and everything older SMP firmware
//! reports) and a grouped one (subsystem group plus group-local return code)
//! used by SMPv2 firmware. [`classify`] folds both into one integer space
//! that host bindings decode identically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{GLOBAL_CODE_UNSET, GROUP_CODE_STRIDE};
use crate::states::LifecycleState;

/// A group-local return code reported by SMPv2 firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupReturnCode {
    pub group: u16,
    pub rc: i32,
}

/// What went wrong underneath an [`EngineError`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FailureCause {
    /// The link failed before any structured answer arrived.
    Transport,
    /// The engine gave up waiting for the device.
    Timeout,
    /// The device answered with an error code.
    Device {
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group: Option<GroupReturnCode>,
    },
}

/// A failure surfaced by the transport & transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub message: String,
    pub cause: FailureCause,
}

impl EngineError {
    /// Link-level failure with no device code.
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: FailureCause::Transport,
        }
    }

    /// Engine-side timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: FailureCause::Timeout,
        }
    }

    /// Flat device code (no group).
    pub fn device(message: impl Into<String>, code: i32) -> Self {
        Self {
            message: message.into(),
            cause: FailureCause::Device { code, group: None },
        }
    }

    /// Grouped SMPv2 device code.
    pub fn grouped(message: impl Into<String>, code: i32, group: u16, rc: i32) -> Self {
        Self {
            message: message.into(),
            cause: FailureCause::Device {
                code,
                group: Some(GroupReturnCode { group, rc }),
            },
        }
    }

    /// Returns `true` for engine timeouts.
    pub fn is_timeout(&self) -> bool {
        self.cause == FailureCause::Timeout
    }
}

/// Maps a failure onto the global error-code space.
///
/// - no structured code: [`GLOBAL_CODE_UNSET`] (-99)
/// - flat code `c`: `c`
/// - group `g`, return code `rc`: `(g + 1) * 1000 + rc`
pub fn classify(error: &EngineError) -> i32 {
    match &error.cause {
        FailureCause::Transport | FailureCause::Timeout => GLOBAL_CODE_UNSET,
        FailureCause::Device { code, group: None } => *code,
        FailureCause::Device {
            group: Some(g), ..
        } => (i32::from(g.group) + 1) * GROUP_CODE_STRIDE + g.rc,
    }
}

/// SMP management groups known to produce grouped return codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SmpGroup {
    Default,
    Image,
    Stats,
    Settings,
    Filesystem,
    Shell,
}

impl SmpGroup {
    /// Resolves a wire group id.
    pub fn from_id(id: u16) -> Option<Self> {
        match id {
            0 => Some(Self::Default),
            1 => Some(Self::Image),
            2 => Some(Self::Stats),
            3 => Some(Self::Settings),
            8 => Some(Self::Filesystem),
            9 => Some(Self::Shell),
            _ => None,
        }
    }

    /// Wire group id.
    pub fn id(self) -> u16 {
        match self {
            Self::Default => 0,
            Self::Image => 1,
            Self::Stats => 2,
            Self::Settings => 3,
            Self::Filesystem => 8,
            Self::Shell => 9,
        }
    }
}

/// Domain a global code decodes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeDomain {
    /// No code was received from the device.
    Unset,
    /// Failure raised on this side, not by the device.
    Generic,
    /// Flat code space (`[0, 999]`).
    Flat(i32),
    /// Grouped code space.
    Group { group: u16, rc: i32 },
}

/// Decodes a global code back into its domain. Inverse of [`classify`].
pub fn describe(code: i32) -> CodeDomain {
    match code {
        GLOBAL_CODE_UNSET => CodeDomain::Unset,
        c if c < 0 => CodeDomain::Generic,
        c if c < GROUP_CODE_STRIDE => CodeDomain::Flat(c),
        c => CodeDomain::Group {
            group: (c / GROUP_CODE_STRIDE - 1) as u16,
            rc: c % GROUP_CODE_STRIDE,
        },
    }
}

/// Coarse reason an install run died, keyed to the phase it died in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallFatalErrorType {
    Generic,
    InstallationAlreadyInProgress,
    InvalidSettings,
    GivenFirmwareDataUnhealthy,
    InstallationInitializationFailed,
    FirmwareExtendedDataIntegrityChecksFailed,
    FirmwareUploadingErroredOut,
    PostInstallationDeviceHealthcheckTestsFailed,
    PostInstallationDeviceRebootingFailed,
    FirmwareFinishingImageSwapTimeout,
    FirmwarePostInstallationConfirmationFailed,
}

impl InstallFatalErrorType {
    /// Picks the fatal-error type from the phase the install was in when it
    /// failed.
    pub fn for_phase(phase: LifecycleState, timed_out: bool) -> Self {
        match phase {
            LifecycleState::Idle => Self::InstallationInitializationFailed,
            LifecycleState::Validating => Self::FirmwareExtendedDataIntegrityChecksFailed,
            LifecycleState::Uploading | LifecycleState::Paused => {
                Self::FirmwareUploadingErroredOut
            }
            LifecycleState::Testing => Self::PostInstallationDeviceHealthcheckTestsFailed,
            LifecycleState::Resetting => Self::PostInstallationDeviceRebootingFailed,
            LifecycleState::Confirming if timed_out => Self::FirmwareFinishingImageSwapTimeout,
            LifecycleState::Confirming => Self::FirmwarePostInstallationConfirmationFailed,
            _ => Self::Generic,
        }
    }

    /// Numeric value shared with host bindings.
    pub fn code(self) -> i32 {
        match self {
            Self::Generic => 0,
            Self::InstallationAlreadyInProgress => 1,
            Self::InvalidSettings => 2,
            Self::GivenFirmwareDataUnhealthy => 3,
            Self::InstallationInitializationFailed => 4,
            Self::FirmwareExtendedDataIntegrityChecksFailed => 5,
            Self::FirmwareUploadingErroredOut => 6,
            Self::PostInstallationDeviceHealthcheckTestsFailed => 7,
            Self::PostInstallationDeviceRebootingFailed => 8,
            Self::FirmwareFinishingImageSwapTimeout => 9,
            Self::FirmwarePostInstallationConfirmationFailed => 10,
        }
    }
}

/// The last fatal error of a controller. Last one wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub message: String,
    pub global_code: i32,
    /// Phase the run was in when it failed.
    pub state: LifecycleState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_error_type: Option<InstallFatalErrorType>,
    pub occurred_at: DateTime<Utc>,
}

impl ErrorRecord {
    /// Builds a record stamped with the current time.
    pub fn new(message: impl Into<String>, global_code: i32, state: LifecycleState) -> Self {
        Self {
            message: message.into(),
            global_code,
            state,
            fatal_error_type: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_fatal_error_type(mut self, fatal: InstallFatalErrorType) -> Self {
        self.fatal_error_type = Some(fatal);
        self
    }
}
