//! Typed errors and result aliases for the boot sequence.

use crate::dispatch::DispatchError;
use crate::settings::SettingsError;
use error_stack::Report;
use hotline_kernel::{BootStage, ExitCode};
use thiserror::Error;

/// Error-stack–backed result alias for first-boot operations.
pub type BootResult<T> = ::std::result::Result<T, Report<BootError>>;

/// Extension trait to convert `Result<T, BootError>` into [`BootResult<T>`].
pub trait IntoBootReport<T> {
    fn into_report(self) -> BootResult<T>;
}

impl<T> IntoBootReport<T> for ::std::result::Result<T, BootError> {
    #[inline]
    fn into_report(self) -> BootResult<T> {
        self.map_err(Report::new)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BootError {
    #[error("Invalid host settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Module could not be loaded: {0}")]
    ModuleLoad(String),

    #[error("Shared HTTP client could not be built: {0}")]
    Http(String),

    #[error("Gateway connection could not be established: {0}")]
    Connection(String),

    #[error("Stage {stage} returned {code}")]
    Stage { stage: BootStage, code: ExitCode },

    /// The dispatcher was driven out of order. Always a host bug.
    #[error("Dispatcher protocol violation: {0}")]
    Protocol(#[from] DispatchError),
}

impl BootError {
    /// Process exit code for a first-boot failure.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Settings(_) => ExitCode::ConfigInvalid,
            Self::Connection(_) => ExitCode::ConnectionSetup,
            Self::Stage { code, .. } => *code,
            Self::ModuleLoad(_) | Self::Http(_) | Self::Protocol(_) => ExitCode::Failure,
        }
    }

    /// Stage the error belongs to. Loading counts as part of `Config`, the
    /// gateway connection as the entry of `Init`.
    pub fn stage(&self) -> BootStage {
        match self {
            Self::Settings(_) => BootStage::Args,
            Self::ModuleLoad(_) => BootStage::Config,
            Self::Http(_) => BootStage::PreInit,
            Self::Connection(_) | Self::Protocol(_) => BootStage::Init,
            Self::Stage { stage, .. } => *stage,
        }
    }
}

/// Why the first boot stopped. The host exits with `code`.
#[derive(Debug)]
pub struct BootFailure {
    pub stage: BootStage,
    pub code: ExitCode,
    pub report: Report<BootError>,
}

impl From<Report<BootError>> for BootFailure {
    fn from(report: Report<BootError>) -> Self {
        let error = report.current_context();
        Self {
            stage: error.stage(),
            code: error.exit_code(),
            report,
        }
    }
}

impl std::fmt::Display for BootFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "boot failed in stage {} with {}: {}",
            self.stage,
            self.code,
            self.report.current_context()
        )
    }
}
