//! Per-run transfer bookkeeping shared by every smpflow operation.
//!
//! Nothing in here talks to a device. The lifecycle crate owns one
//! [`TransferSession`] per controller and feeds it engine samples; this crate
//! turns those samples into throughput figures and de-duplicated progress.

mod fingerprint;
mod milestones;
mod session;
mod throughput;
mod validation;

pub use fingerprint::image_fingerprint;
pub use milestones::OverallProgress;
pub use session::{ProgressUpdate, TransferSession};
pub use throughput::{Throughput, ThroughputTracker};
pub use validation::{validate_memory_alignment, validate_remote_path};

/// Errors produced by the transfer crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid byte alignment: {0}")]
    InvalidAlignment(u32),
}
