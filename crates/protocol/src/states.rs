use std::fmt;

use serde::{Deserialize, Serialize};

/// The five long-running device operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Reset,
    Upload,
    Download,
    Erase,
    Install,
}

const RESET_STATES: &[LifecycleState] = &[
    LifecycleState::None,
    LifecycleState::Idle,
    LifecycleState::Resetting,
    LifecycleState::Complete,
    LifecycleState::Error,
];

const ERASE_STATES: &[LifecycleState] = &[
    LifecycleState::None,
    LifecycleState::Idle,
    LifecycleState::Erasing,
    LifecycleState::Complete,
    LifecycleState::Error,
];

const DOWNLOAD_STATES: &[LifecycleState] = &[
    LifecycleState::None,
    LifecycleState::Idle,
    LifecycleState::Downloading,
    LifecycleState::Paused,
    LifecycleState::Resuming,
    LifecycleState::Complete,
    LifecycleState::Cancelling,
    LifecycleState::Cancelled,
    LifecycleState::Error,
];

const UPLOAD_STATES: &[LifecycleState] = &[
    LifecycleState::None,
    LifecycleState::Idle,
    LifecycleState::Uploading,
    LifecycleState::Paused,
    LifecycleState::Resuming,
    LifecycleState::Complete,
    LifecycleState::Cancelling,
    LifecycleState::Cancelled,
    LifecycleState::Error,
];

const INSTALL_STATES: &[LifecycleState] = &[
    LifecycleState::None,
    LifecycleState::Idle,
    LifecycleState::Validating,
    LifecycleState::Uploading,
    LifecycleState::Paused,
    LifecycleState::Testing,
    LifecycleState::Resetting,
    LifecycleState::Confirming,
    LifecycleState::Complete,
    LifecycleState::Cancelling,
    LifecycleState::Cancelled,
    LifecycleState::Error,
];

impl OperationKind {
    /// All kinds, in declaration order.
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Reset,
        OperationKind::Upload,
        OperationKind::Download,
        OperationKind::Erase,
        OperationKind::Install,
    ];

    /// States this kind's machine may occupy.
    pub fn states(self) -> &'static [LifecycleState] {
        match self {
            Self::Reset => RESET_STATES,
            Self::Erase => ERASE_STATES,
            Self::Download => DOWNLOAD_STATES,
            Self::Upload => UPLOAD_STATES,
            Self::Install => INSTALL_STATES,
        }
    }

    /// Returns `true` if `state` is legal for this kind.
    pub fn admits(self, state: LifecycleState) -> bool {
        self.states().contains(&state)
    }

    /// The phase during which bytes move over the wire, if the kind has one.
    pub fn transfer_phase(self) -> Option<LifecycleState> {
        match self {
            Self::Upload | Self::Install => Some(LifecycleState::Uploading),
            Self::Download => Some(LifecycleState::Downloading),
            Self::Reset | Self::Erase => None,
        }
    }

    /// Phase entered as soon as the engine accepts the run.
    ///
    /// Kinds without byte progress have no callback that would move them out
    /// of Idle, so they go active immediately.
    pub fn phase_on_start(self) -> Option<LifecycleState> {
        match self {
            Self::Reset => Some(LifecycleState::Resetting),
            Self::Erase => Some(LifecycleState::Erasing),
            Self::Upload | Self::Download | Self::Install => None,
        }
    }

    /// Phase entered by a successful `resume()`.
    pub fn resume_phase(self) -> Option<LifecycleState> {
        match self {
            Self::Upload | Self::Download => Some(LifecycleState::Resuming),
            Self::Install => Some(LifecycleState::Uploading),
            Self::Reset | Self::Erase => None,
        }
    }

    /// Terminal phase reached when the engine confirms a cancellation.
    pub fn cancelled_phase(self) -> LifecycleState {
        if self.admits(LifecycleState::Cancelled) {
            LifecycleState::Cancelled
        } else {
            LifecycleState::Error
        }
    }

    /// Returns `true` if the kind can be paused mid-transfer.
    pub fn supports_pause(self) -> bool {
        self.admits(LifecycleState::Paused)
    }

    /// Stable category used on log advertisements.
    pub fn log_category(self) -> &'static str {
        match self {
            Self::Reset => "device-resetter",
            Self::Upload => "file-uploader",
            Self::Download => "file-downloader",
            Self::Erase => "firmware-eraser",
            Self::Install => "firmware-installer",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reset => "reset",
            Self::Upload => "upload",
            Self::Download => "download",
            Self::Erase => "erase",
            Self::Install => "install",
        };
        f.write_str(s)
    }
}

/// Phase of an operation run.
///
/// One enum covers every kind; [`OperationKind::admits`] says which subset a
/// given kind uses. Reset and erase call their failure phase "failed"; it is
/// the same [`LifecycleState::Error`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    None,
    Idle,
    Validating,
    Uploading,
    Downloading,
    Resetting,
    Erasing,
    Paused,
    Resuming,
    Testing,
    Confirming,
    Complete,
    Cancelling,
    Cancelled,
    Error,
}

impl LifecycleState {
    /// A cold machine is eligible for a fresh start.
    pub fn is_cold(self) -> bool {
        matches!(
            self,
            Self::None | Self::Complete | Self::Cancelled | Self::Error
        )
    }

    /// Terminal phases end a run. `None` is cold but not terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Cancelled | Self::Error)
    }

    /// Phases in which the device is doing work for the current run.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Validating
                | Self::Uploading
                | Self::Downloading
                | Self::Resetting
                | Self::Erasing
                | Self::Testing
                | Self::Confirming
        )
    }

    /// Human-facing label, honouring the per-kind naming of the failure phase.
    pub fn label(self, kind: OperationKind) -> &'static str {
        match self {
            Self::Error if matches!(kind, OperationKind::Reset | OperationKind::Erase) => "failed",
            other => other.as_str(),
        }
    }

    /// Wire name of the state (matches the serde representation).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Uploading => "uploading",
            Self::Downloading => "downloading",
            Self::Resetting => "resetting",
            Self::Erasing => "erasing",
            Self::Paused => "paused",
            Self::Resuming => "resuming",
            Self::Testing => "testing",
            Self::Confirming => "confirming",
            Self::Complete => "complete",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
