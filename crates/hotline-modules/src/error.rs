//! Typed errors and result aliases for module loading.

use error_stack::Report;
use std::path::PathBuf;
use thiserror::Error;

/// Error-stack–backed result alias for loader operations.
pub type ModuleLoadResult<T> = ::std::result::Result<T, Report<ModuleLoadError>>;

/// Extension trait to convert `Result<T, ModuleLoadError>` into
/// [`ModuleLoadResult<T>`].
pub trait IntoLoadReport<T> {
    fn into_report(self) -> ModuleLoadResult<T>;
}

impl<T> IntoLoadReport<T> for ::std::result::Result<T, ModuleLoadError> {
    #[inline]
    fn into_report(self) -> ModuleLoadResult<T> {
        self.map_err(Report::new)
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ModuleLoadError {
    #[error("No artifact for module '{name}' in {}", directory.display())]
    ArtifactNotFound { name: String, directory: PathBuf },

    #[error("Artifact name does not follow the version convention: {0}")]
    InvalidArtifactName(String),

    #[error("Invalid module version: {0}")]
    InvalidVersion(String),

    #[error("Failed to load library: {0}")]
    LibraryLoad(String),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("ABI mismatch: host expects {expected}, artifact exports {actual}")]
    AbiMismatch { expected: u32, actual: u32 },

    #[error("Module construction failed: {0}")]
    CreationFailed(String),

    #[error("Loader worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
