//! Hotline Modules
//!
//! Produces fresh [`AppModule`](hotline_kernel::AppModule) instances without
//! reloading the host's own code:
//!
//! - [`ArtifactLocator`]: resolves `lib<name>-<version>.so`-style artifacts
//! - [`DylibLoader`]: loads each artifact into its own code image
//! - [`StaticLoader`]: in-process factory, for builtin mode and tests
//!
//! Everything above this crate talks to the [`ModuleLoader`] trait only.

mod artifact;
mod error;
mod loader;

pub use artifact::{ArtifactInfo, ArtifactLocator, ModuleVersion};
pub use error::{IntoLoadReport, ModuleLoadError, ModuleLoadResult};
pub use loader::{
    DylibLoader, LoadedModule, ModuleFactory, ModuleImage, ModuleLoader, StaticLoader,
};
