//! Stage exit codes.
//!
//! The numeric values are part of the operational contract (supervisors and
//! scripts match on them) and must never be renumbered.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result of a boot stage hook, and the code the host exits with when a
/// first-boot stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExitCode {
    /// Stage completed, continue with the next one.
    Success = 0,
    /// Unclassified failure.
    Failure = 1,
    /// A configuration file is missing or invalid.
    ConfigInvalid = 2,
    /// The gateway connection could not be set up.
    ConnectionSetup = 3,
    /// The datastore could not be reached or prepared.
    DatastoreSetup = 4,
}

impl ExitCode {
    /// Numeric process exit status.
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Map a raw status back to an exit code. Unknown non-zero values
    /// collapse into [`ExitCode::Failure`].
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            2 => Self::ConfigInvalid,
            3 => Self::ConnectionSetup,
            4 => Self::DatastoreSetup,
            _ => Self::Failure,
        }
    }

    /// Short label used in logs and acknowledgments.
    pub fn label(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::ConfigInvalid => "configuration missing or invalid",
            Self::ConnectionSetup => "connection setup failed",
            Self::DatastoreSetup => "datastore setup failed",
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label(), self.code())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code as u8)
    }
}
