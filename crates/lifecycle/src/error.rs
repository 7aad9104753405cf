//! Lifecycle error types.

use smpflow_protocol::{EngineError, ErrorRecord, Verdict};

/// Why a `start()` request was turned down.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("another operation is already in progress")]
    AlreadyInProgress,

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("failed to commence: {0}")]
    Commence(#[from] EngineError),
}

impl StartError {
    /// The verdict reported back to the caller.
    pub fn verdict(&self) -> Verdict {
        match self {
            Self::AlreadyInProgress => Verdict::FailedAlreadyInProgress,
            Self::InvalidParameters(_) => Verdict::FailedInvalidParameters,
            Self::InvalidData(_) => Verdict::FailedInvalidData,
            Self::Commence(_) => Verdict::FailedToCommence,
        }
    }
}

impl From<smpflow_transfer::TransferError> for StartError {
    fn from(e: smpflow_transfer::TransferError) -> Self {
        Self::InvalidParameters(e.to_string())
    }
}

/// Errors loading or validating a [`LifecycleConfig`](crate::LifecycleConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// How an awaited run ended, when it did not complete.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("start rejected: {0}")]
    Rejected(Verdict),

    #[error("operation failed: {} (code {})", .0.message, .0.global_code)]
    Failed(ErrorRecord),

    #[error("operation cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("controller disposed")]
    Disposed,
}

impl OperationError {
    /// `true` when the run itself went wrong on the device or link, as
    /// opposed to being refused, cancelled or cut short by disposal.
    pub fn is_file_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Rejected(Verdict::FailedToCommence)
        )
    }
}
