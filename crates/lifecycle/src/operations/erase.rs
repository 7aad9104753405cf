use smpflow_protocol::OperationKind;

use super::{OperationStrategy, Prepared};
use crate::config::LifecycleConfig;
use crate::engine::EngineRequest;
use crate::error::StartError;

/// Erases one firmware image slot.
#[derive(Debug, Clone, Copy, Default)]
pub struct EraseRequest {
    pub image_index: u32,
}

impl EraseRequest {
    pub fn new(image_index: u32) -> Self {
        Self { image_index }
    }
}

#[derive(Debug, Default)]
pub struct EraseStrategy;

impl OperationStrategy for EraseStrategy {
    const KIND: OperationKind = OperationKind::Erase;
    type Request = EraseRequest;
    type RunState = ();

    fn prepare(
        &self,
        request: EraseRequest,
        _config: &LifecycleConfig,
    ) -> Result<Prepared, StartError> {
        Ok(Prepared::new(
            format!("image/{}", request.image_index),
            EngineRequest::Erase {
                image_index: request.image_index,
            },
        ))
    }
}
