use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::InstallFatalErrorType;
use crate::states::LifecycleState;

/// Severity of a caller-visible log advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "TRACE")]
    Trace,
    #[serde(rename = "DEBUG")]
    Debug,
    #[serde(rename = "VERBOSE")]
    Verbose,
    #[serde(rename = "INFO")]
    Info,
    #[serde(rename = "WARN")]
    Warning,
    #[serde(rename = "ERROR")]
    Error,
    #[serde(rename = "FATAL")]
    Fatal,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Verbose => "VERBOSE",
            Self::Info => "INFO",
            Self::Warning => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fire-and-forget notification delivered to observers.
///
/// Advertisements are produced under the controller's state lock, so the
/// order observers see them in is the order the state changed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Advertisement {
    StateChanged {
        old: LifecycleState,
        new: LifecycleState,
    },
    #[serde(rename_all = "camelCase")]
    Progress {
        resource: String,
        percent: u8,
        instant_kbps: f64,
        average_kbps: f64,
    },
    BusyChanged {
        busy: bool,
    },
    #[serde(rename_all = "camelCase")]
    Started {
        resource: String,
        total_bytes: u64,
    },
    Completed {
        resource: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Vec<u8>>,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        resource: String,
        message: String,
        code: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fatal_error_type: Option<InstallFatalErrorType>,
    },
    Cancelling {
        reason: String,
    },
    Cancelled {
        reason: String,
    },
    Log {
        message: String,
        category: String,
        level: LogLevel,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        resource: String,
    },
    /// Install only: whole-run progress across every install phase.
    OverallProgress {
        percent: u8,
    },
    /// Install only: the image was already on the device, so (almost) no bytes
    /// moved. `active` is true when it was already the running image.
    FirmwareAlreadyCached {
        active: bool,
    },
}

impl Advertisement {
    /// Returns `true` for the advertisements that end a run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_wire_strings() {
        let levels = [
            (LogLevel::Trace, "TRACE"),
            (LogLevel::Debug, "DEBUG"),
            (LogLevel::Verbose, "VERBOSE"),
            (LogLevel::Info, "INFO"),
            (LogLevel::Warning, "WARN"),
            (LogLevel::Error, "ERROR"),
            (LogLevel::Fatal, "FATAL"),
        ];
        for (level, wire) in levels {
            assert_eq!(level.as_str(), wire);
            assert_eq!(serde_json::to_string(&level).unwrap(), format!("\"{wire}\""));
        }
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn progress_serializes_camel_case_fields() {
        let ad = Advertisement::Progress {
            resource: "/lib/app.img".into(),
            percent: 50,
            instant_kbps: 1.5,
            average_kbps: 1.0,
        };
        let json = serde_json::to_value(&ad).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["percent"], 50);
        assert_eq!(json["instantKbps"], 1.5);
        assert_eq!(json["averageKbps"], 1.0);
    }

    #[test]
    fn state_changed_roundtrip() {
        let ad = Advertisement::StateChanged {
            old: LifecycleState::Idle,
            new: LifecycleState::Uploading,
        };
        let json = serde_json::to_string(&ad).unwrap();
        assert_eq!(
            json,
            r#"{"type":"state_changed","old":"idle","new":"uploading"}"#
        );
        let parsed: Advertisement = serde_json::from_str(&json).unwrap();
        assert_eq!(ad, parsed);
    }

    #[test]
    fn log_omits_empty_resource() {
        let ad = Advertisement::Log {
            message: "hello".into(),
            category: "file-uploader".into(),
            level: LogLevel::Info,
            resource: String::new(),
        };
        let json = serde_json::to_value(&ad).unwrap();
        assert!(json.get("resource").is_none());
        assert_eq!(json["level"], "INFO");
    }

    #[test]
    fn terminal_advertisements() {
        assert!(
            Advertisement::Cancelled {
                reason: "x".into()
            }
            .is_terminal()
        );
        assert!(
            !Advertisement::Cancelling {
                reason: "x".into()
            }
            .is_terminal()
        );
        assert!(!Advertisement::BusyChanged { busy: false }.is_terminal());
    }
}
