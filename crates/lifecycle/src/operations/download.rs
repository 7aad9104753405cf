use smpflow_protocol::OperationKind;
use smpflow_transfer::validate_remote_path;

use super::{OperationStrategy, Prepared};
use crate::config::LifecycleConfig;
use crate::engine::EngineRequest;
use crate::error::StartError;

/// Reads a file from the device filesystem.
#[derive(Debug, Clone, Default)]
pub struct DownloadRequest {
    pub remote_path: String,
}

impl DownloadRequest {
    pub fn new(remote_path: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct DownloadStrategy;

impl OperationStrategy for DownloadStrategy {
    const KIND: OperationKind = OperationKind::Download;
    type Request = DownloadRequest;
    type RunState = ();

    fn prepare(
        &self,
        request: DownloadRequest,
        _config: &LifecycleConfig,
    ) -> Result<Prepared, StartError> {
        let remote_path = validate_remote_path(&request.remote_path)?;
        Ok(Prepared::new(
            remote_path.clone(),
            EngineRequest::Download { remote_path },
        ))
    }
}
