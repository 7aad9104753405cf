use smpflow_protocol::OperationKind;

use super::{OperationStrategy, Prepared};
use crate::config::LifecycleConfig;
use crate::engine::EngineRequest;
use crate::error::StartError;

/// Resource name used on reset advertisements.
pub const RESET_RESOURCE: &str = "device";

/// A device reset takes no parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResetRequest;

#[derive(Debug, Default)]
pub struct ResetStrategy;

impl OperationStrategy for ResetStrategy {
    const KIND: OperationKind = OperationKind::Reset;
    type Request = ResetRequest;
    type RunState = ();

    fn prepare(
        &self,
        _request: ResetRequest,
        _config: &LifecycleConfig,
    ) -> Result<Prepared, StartError> {
        Ok(Prepared::new(RESET_RESOURCE, EngineRequest::Reset))
    }
}
