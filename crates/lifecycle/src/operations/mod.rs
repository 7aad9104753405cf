//! The five operation kinds.
//!
//! Each kind is a small strategy plugged into the generic
//! [`OperationController`](crate::OperationController): it validates its own
//! request, names the resource and builds the engine request. Install also
//! hooks into transitions for its overall-progress feed.

mod download;
mod erase;
mod install;
mod reset;
mod upload;

pub use download::{DownloadRequest, DownloadStrategy};
pub use erase::{EraseRequest, EraseStrategy};
pub use install::{InstallRequest, InstallRunState, InstallSettings, InstallStrategy};
pub use reset::{ResetRequest, ResetStrategy};
pub use upload::{UploadRequest, UploadStrategy};

use smpflow_protocol::{
    Advertisement, EngineError, InstallFatalErrorType, LifecycleState, OperationKind,
};
use smpflow_transfer::{ProgressUpdate, TransferSession};

use crate::config::LifecycleConfig;
use crate::engine::EngineRequest;
use crate::error::StartError;

/// A validated request, ready to hand to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Prepared {
    /// Identifier carried on advertisements.
    pub resource: String,
    pub total_bytes: Option<u64>,
    pub request: EngineRequest,
    /// Non-fatal remarks, advertised as warning-level logs once the run starts.
    pub warnings: Vec<String>,
}

impl Prepared {
    pub fn new(resource: impl Into<String>, request: EngineRequest) -> Self {
        Self {
            resource: resource.into(),
            total_bytes: None,
            request,
            warnings: Vec::new(),
        }
    }
}

/// Per-kind behaviour of an [`OperationController`](crate::OperationController).
pub trait OperationStrategy: Default + Send + Sync + 'static {
    const KIND: OperationKind;

    type Request: Send;

    /// Extra per-run state, reset at every start.
    type RunState: Default + Send;

    /// Validates `request`. Parameter errors must be reported before data
    /// errors.
    fn prepare(
        &self,
        request: Self::Request,
        config: &LifecycleConfig,
    ) -> Result<Prepared, StartError>;

    /// Runs after every applied transition.
    fn on_transition(
        &self,
        _run: &mut Self::RunState,
        _old: LifecycleState,
        _new: LifecycleState,
        _session: &TransferSession,
        _out: &mut Vec<Advertisement>,
    ) {
    }

    /// Runs after every advertised progress figure.
    fn on_progress(
        &self,
        _run: &mut Self::RunState,
        _update: &ProgressUpdate,
        _out: &mut Vec<Advertisement>,
    ) {
    }

    /// Fatal-error type attached to failures of this kind.
    fn fatal_error_type(
        &self,
        _failed_in: LifecycleState,
        _error: &EngineError,
    ) -> Option<InstallFatalErrorType> {
        None
    }
}
