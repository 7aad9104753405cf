//! Lifecycle controllers for smpflow device operations.
//!
//! Five operation kinds (reset, file upload, file download, image erase and
//! firmware install) share one [`OperationController`]. A controller starts
//! runs against a pluggable [`TransferEngine`], tracks the per-kind state
//! machine, and fans advertisements out to [`Observer`]s from a background
//! task.
//!
//! ```ignore
//! let uploader = FileUploader::new(factory, ConnectionTarget::new("AA:BB"), LifecycleConfig::default());
//! let (_id, mut rx) = uploader.subscribe_channel();
//! uploader.start(UploadRequest::new("/lfs/app.img", Some(bytes)));
//! ```

pub mod batch;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod engine;
pub mod error;
mod machine;
pub mod operations;

#[cfg(test)]
mod testing;

pub use batch::{BatchOptions, BatchOutcome};
pub use config::LifecycleConfig;
pub use controller::{
    DeviceResetter, FileDownloader, FileUploader, FirmwareEraser, FirmwareInstaller,
    OperationController, Outcome,
};
pub use dispatch::{ChannelObserver, Observer, SubscriptionId};
pub use engine::{
    ActiveTransfer, EngineCallbacks, EngineFactory, EnginePhase, EngineRequest, TransferEngine,
};
pub use error::{ConfigError, OperationError, StartError};
pub use operations::{
    DownloadRequest, EraseRequest, InstallRequest, InstallSettings, OperationStrategy, Prepared,
    ResetRequest, UploadRequest,
};
