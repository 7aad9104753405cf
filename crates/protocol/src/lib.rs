//! Shared types for smpflow device operations.
//!
//! Everything a host binding needs to decode lives here: operation kinds and
//! their lifecycle states, start verdicts, the advertisement payloads emitted
//! to observers, and the global error-code space produced by [`classify`].

pub mod constants;
pub mod errors;
pub mod events;
pub mod states;
pub mod types;

pub use errors::{
    CodeDomain, EngineError, ErrorRecord, FailureCause, GroupReturnCode, InstallFatalErrorType,
    SmpGroup, classify, describe,
};
pub use events::{Advertisement, LogLevel};
pub use states::{LifecycleState, OperationKind};
pub use types::{ConnectionTarget, InstallMode, Verdict};
