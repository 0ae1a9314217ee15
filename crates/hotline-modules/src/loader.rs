//! Module loaders
//!
//! [`DylibLoader`] gives every load its own code image: the artifact is
//! copied to a private shadow file and the shadow is opened, so the dynamic
//! linker never hands back a cached image for a path it has seen before and
//! the artifact on disk can be replaced while an older build is running.
//! The image is unmapped once the last [`ModuleImage`] reference is gone.

use hotline_kernel::module::{
    ABI_VERSION_SYMBOL, AbiVersionFn, CREATE_SYMBOL, CreateModuleFn, MODULE_ABI_VERSION,
    ModuleBox, SET_DISPATCH_SYMBOL, SetDispatchFn,
};
use hotline_kernel::{AppModule, HostHandle, ModuleMetadata};
use libloading::{Library, Symbol};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempPath;
use tracing::{Dispatch, debug, info, warn};

use crate::artifact::{ArtifactInfo, ArtifactLocator};
use crate::error::{IntoLoadReport, ModuleLoadError, ModuleLoadResult};

/// A mapped code image. Anything created from the image must hold an
/// `Arc<ModuleImage>` so the code outlives its last caller.
pub struct ModuleImage {
    // Field order matters: the library is closed before the shadow file is
    // removed.
    library: Library,
    shadow: TempPath,
    artifact: ArtifactInfo,
}

impl ModuleImage {
    pub fn artifact(&self) -> &ArtifactInfo {
        &self.artifact
    }

    pub fn shadow_path(&self) -> &Path {
        &self.shadow
    }

    /// Read the exported ABI version.
    ///
    /// # Safety
    /// Calls into foreign code.
    unsafe fn abi_version(&self) -> ModuleLoadResult<u32> {
        unsafe {
            let version_fn: Symbol<AbiVersionFn> = self
                .library
                .get(ABI_VERSION_SYMBOL)
                .map_err(|e| symbol_error(ABI_VERSION_SYMBOL, e))?;
            Ok(version_fn())
        }
    }

    /// Hand the host's tracing dispatcher to the image. Returns `false` if
    /// the image already had one.
    ///
    /// # Safety
    /// Calls into foreign code; the ABI version must have been checked.
    unsafe fn set_dispatch(&self, dispatch: &Dispatch) -> ModuleLoadResult<bool> {
        unsafe {
            let set_fn: Symbol<SetDispatchFn> = self
                .library
                .get(SET_DISPATCH_SYMBOL)
                .map_err(|e| symbol_error(SET_DISPATCH_SYMBOL, e))?;
            Ok(set_fn(dispatch as *const Dispatch))
        }
    }

    /// Construct a module instance.
    ///
    /// # Safety
    /// Calls into foreign code; the artifact must have been built against the
    /// same kernel as the host (checked through the ABI version).
    unsafe fn create(&self, host: &HostHandle) -> ModuleLoadResult<ModuleBox> {
        unsafe {
            let create_fn: Symbol<CreateModuleFn> = self
                .library
                .get(CREATE_SYMBOL)
                .map_err(|e| symbol_error(CREATE_SYMBOL, e))?;

            let raw = create_fn(host as *const HostHandle);
            if raw.is_null() {
                return Err(ModuleLoadError::CreationFailed(
                    "module constructor panicked or returned null".to_string(),
                ))
                .into_report();
            }
            Ok(*Box::from_raw(raw))
        }
    }
}

fn symbol_error(symbol: &[u8], e: libloading::Error) -> error_stack::Report<ModuleLoadError> {
    error_stack::Report::new(ModuleLoadError::SymbolNotFound(format!(
        "{}: {}",
        String::from_utf8_lossy(symbol),
        e
    )))
}

impl Drop for ModuleImage {
    fn drop(&mut self) {
        debug!(
            artifact = %self.artifact.path.display(),
            version = %self.artifact.version,
            "Unloading module image"
        );
    }
}

impl std::fmt::Debug for ModuleImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleImage")
            .field("artifact", &self.artifact)
            .field("shadow", &self.shadow.to_path_buf())
            .finish()
    }
}

/// A constructed module plus the image its code lives in.
pub struct LoadedModule {
    // Declared first so it drops before the image.
    module: ModuleBox,
    image: Option<Arc<ModuleImage>>,
    instance_id: String,
    loaded_at: Instant,
}

impl LoadedModule {
    /// Wrap a module built from an image.
    pub fn from_image(module: ModuleBox, image: Arc<ModuleImage>) -> Self {
        Self {
            module,
            image: Some(image),
            instance_id: uuid::Uuid::now_v7().to_string(),
            loaded_at: Instant::now(),
        }
    }

    /// Wrap a module whose code is linked into the host.
    pub fn linked(module: ModuleBox) -> Self {
        Self {
            module,
            image: None,
            instance_id: uuid::Uuid::now_v7().to_string(),
            loaded_at: Instant::now(),
        }
    }

    pub fn module(&self) -> &dyn AppModule {
        self.module.as_ref()
    }

    pub fn module_mut(&mut self) -> &mut dyn AppModule {
        self.module.as_mut()
    }

    pub fn metadata(&self) -> &ModuleMetadata {
        self.module.metadata()
    }

    /// Guard on the code image, `None` for linked modules.
    pub fn image(&self) -> Option<Arc<ModuleImage>> {
        self.image.clone()
    }

    pub fn artifact(&self) -> Option<&ArtifactInfo> {
        self.image.as_deref().map(ModuleImage::artifact)
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }
}

impl std::fmt::Debug for LoadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModule")
            .field("metadata", self.metadata())
            .field("instance_id", &self.instance_id)
            .field("artifact", &self.artifact())
            .finish()
    }
}

/// Produces new module instances.
#[async_trait::async_trait]
pub trait ModuleLoader: Send + Sync {
    /// Build a fresh instance, handing it `host` for host-level requests.
    async fn load(&self, host: HostHandle) -> ModuleLoadResult<LoadedModule>;

    /// Human-readable source description for logs.
    fn describe(&self) -> String;
}

/// Loads versioned shared-library artifacts.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    locator: ArtifactLocator,
    shadow_dir: PathBuf,
}

impl DylibLoader {
    pub fn new(locator: ArtifactLocator) -> Self {
        Self {
            locator,
            shadow_dir: std::env::temp_dir().join("hotline-shadow"),
        }
    }

    /// Directory the shadow copies are written to.
    pub fn with_shadow_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shadow_dir = dir.into();
        self
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    /// Copy the artifact to a unique shadow file and open it.
    fn open_image(&self, artifact: ArtifactInfo) -> ModuleLoadResult<ModuleImage> {
        std::fs::create_dir_all(&self.shadow_dir)
            .map_err(ModuleLoadError::from)
            .into_report()?;

        let suffix = artifact
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        let mut shadow = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", artifact.name, artifact.version))
            .suffix(&suffix)
            .tempfile_in(&self.shadow_dir)
            .map_err(ModuleLoadError::from)
            .into_report()?;

        let mut source = std::fs::File::open(&artifact.path)
            .map_err(ModuleLoadError::from)
            .into_report()?;
        std::io::copy(&mut source, shadow.as_file_mut())
            .map_err(ModuleLoadError::from)
            .into_report()?;
        let shadow = shadow.into_temp_path();

        // SAFETY: library initializers of a module artifact are trusted to
        // the same degree as the host binary.
        let library = unsafe { Library::new(&*shadow) }
            .map_err(|e| ModuleLoadError::LibraryLoad(e.to_string()))
            .into_report()?;

        Ok(ModuleImage {
            library,
            shadow,
            artifact,
        })
    }

    /// `dispatch` is the caller's tracing dispatcher; module code logs
    /// through it.
    fn load_blocking(
        &self,
        host: HostHandle,
        dispatch: Dispatch,
    ) -> ModuleLoadResult<LoadedModule> {
        let (version, path) = self.locator.resolve()?;
        let artifact = ArtifactInfo::inspect(&path, self.locator.name(), version)?;
        info!(
            artifact = %artifact.path.display(),
            version = %artifact.version,
            sha256 = %artifact.sha256,
            "Loading module artifact"
        );

        let image = Arc::new(self.open_image(artifact)?);

        let abi = unsafe { image.abi_version()? };
        if abi != MODULE_ABI_VERSION {
            return Err(ModuleLoadError::AbiMismatch {
                expected: MODULE_ABI_VERSION,
                actual: abi,
            })
            .into_report();
        }

        if !unsafe { image.set_dispatch(&dispatch)? } {
            debug!(
                artifact = %image.artifact().path.display(),
                "Module image kept its own tracing dispatcher"
            );
        }

        let module = unsafe { image.create(&host)? };
        info!(
            module = %module.metadata().name,
            version = %module.metadata().version,
            "Module constructed"
        );
        Ok(LoadedModule::from_image(module, image))
    }
}

#[async_trait::async_trait]
impl ModuleLoader for DylibLoader {
    async fn load(&self, host: HostHandle) -> ModuleLoadResult<LoadedModule> {
        let loader = self.clone();
        // Captured here: the blocking pool thread has no scoped dispatcher.
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        tokio::task::spawn_blocking(move || loader.load_blocking(host, dispatch))
            .await
            .map_err(|e| ModuleLoadError::Worker(e.to_string()))
            .into_report()?
    }

    fn describe(&self) -> String {
        format!(
            "dylib '{}' in {}",
            self.locator.name(),
            self.locator.directory().display()
        )
    }
}

/// Constructor of a linked module.
pub type ModuleFactory = Arc<dyn Fn(HostHandle) -> ModuleBox + Send + Sync>;

/// Builds modules from a factory compiled into the host.
///
/// There is no code image to swap, so a reload yields a fresh instance of
/// the same build; configuration changes still take effect.
#[derive(Clone)]
pub struct StaticLoader {
    name: String,
    factory: ModuleFactory,
}

impl StaticLoader {
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(HostHandle) -> ModuleBox + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Arc::new(factory),
        }
    }
}

#[async_trait::async_trait]
impl ModuleLoader for StaticLoader {
    async fn load(&self, host: HostHandle) -> ModuleLoadResult<LoadedModule> {
        let factory = self.factory.clone();
        let built = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || factory(host)));
        match built {
            Ok(module) => Ok(LoadedModule::linked(module)),
            Err(_) => {
                warn!(module = %self.name, "Linked module constructor panicked");
                Err(ModuleLoadError::CreationFailed(format!(
                    "constructor of '{}' panicked",
                    self.name
                )))
                .into_report()
            }
        }
    }

    fn describe(&self) -> String {
        format!("linked '{}'", self.name)
    }
}
