use smpflow_protocol::OperationKind;
use smpflow_transfer::validate_remote_path;

use super::{OperationStrategy, Prepared};
use crate::config::LifecycleConfig;
use crate::engine::EngineRequest;
use crate::error::StartError;

/// Writes a file to the device filesystem.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    /// Caller-chosen label for advertisements; the remote path when empty.
    pub resource_id: String,
    pub remote_path: String,
    /// `None` is rejected; an empty payload creates an empty file.
    pub data: Option<Vec<u8>>,
}

impl UploadRequest {
    pub fn new(remote_path: impl Into<String>, data: Option<Vec<u8>>) -> Self {
        Self {
            resource_id: String::new(),
            remote_path: remote_path.into(),
            data,
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = resource_id.into();
        self
    }
}

#[derive(Debug, Default)]
pub struct UploadStrategy;

impl OperationStrategy for UploadStrategy {
    const KIND: OperationKind = OperationKind::Upload;
    type Request = UploadRequest;
    type RunState = ();

    fn prepare(
        &self,
        request: UploadRequest,
        config: &LifecycleConfig,
    ) -> Result<Prepared, StartError> {
        let remote_path = validate_remote_path(&request.remote_path)?;

        let Some(data) = request.data else {
            return Err(StartError::InvalidData("no data to upload".into()));
        };

        let resource = match request.resource_id.trim() {
            "" => remote_path.clone(),
            id => id.to_string(),
        };

        let total = data.len() as u64;
        let mut prepared = Prepared::new(
            resource,
            EngineRequest::Upload {
                remote_path,
                data,
                window_capacity: config.effective_window(),
                memory_alignment: config.effective_alignment(),
            },
        );
        prepared.total_bytes = Some(total);
        Ok(prepared)
    }
}
