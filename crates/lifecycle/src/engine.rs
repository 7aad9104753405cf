//! Contract with the transport & transfer engine.
//!
//! The engine owns the wire: SMP framing, MTU negotiation, pipelined
//! chunking. Controllers only drive it through these traits, which keeps the
//! lifecycle logic testable against a scripted fake.

use std::sync::Arc;
use std::time::{Duration, Instant};

use smpflow_protocol::{ConnectionTarget, EngineError, InstallMode};

/// Builds engines bound to a device connection.
pub trait EngineFactory: Send + Sync {
    /// Opens a transport to `target`. `mtu_hint` is passed through untouched.
    fn initialize(
        &self,
        target: &ConnectionTarget,
        mtu_hint: Option<u16>,
    ) -> Result<Arc<dyn TransferEngine>, EngineError>;
}

/// An initialized transport able to run one operation at a time.
pub trait TransferEngine: Send + Sync {
    /// Kicks off an operation. Callbacks may fire on any thread, including
    /// synchronously from within this call.
    fn begin(
        &self,
        request: EngineRequest,
        callbacks: Arc<dyn EngineCallbacks>,
    ) -> Result<Arc<dyn ActiveTransfer>, EngineError>;

    /// Best-effort toggle of engine diagnostics.
    fn set_logging_enabled(&self, enabled: bool);

    /// Best-effort request for a high-priority connection interval.
    fn request_high_priority(&self);

    /// Tears the transport down. Must be idempotent.
    fn release(&self);
}

/// Handle to an operation in flight.
pub trait ActiveTransfer: Send + Sync {
    fn pause(&self) -> Result<(), EngineError>;
    fn resume(&self) -> Result<(), EngineError>;
    fn cancel(&self) -> Result<(), EngineError>;
}

/// Install sub-phases reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Validate,
    Upload,
    Test,
    Reset,
    Confirm,
}

/// Events the engine reports back for one operation run.
pub trait EngineCallbacks: Send + Sync {
    fn on_progress(&self, bytes: u64, total: u64, at: Instant);
    fn on_phase(&self, phase: EnginePhase);
    fn on_complete(&self, payload: Option<Vec<u8>>);
    fn on_failure(&self, error: EngineError);
    fn on_cancelled(&self);
}

/// What the engine is asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    Reset,
    Upload {
        remote_path: String,
        data: Vec<u8>,
        window_capacity: Option<u32>,
        memory_alignment: Option<u32>,
    },
    Download {
        remote_path: String,
    },
    Erase {
        image_index: u32,
    },
    Install {
        image: Vec<u8>,
        /// Hex SHA-256 of `image`.
        fingerprint: String,
        mode: InstallMode,
        erase_settings: bool,
        estimated_swap_time: Option<Duration>,
        window_capacity: Option<u32>,
        memory_alignment: Option<u32>,
    },
}
