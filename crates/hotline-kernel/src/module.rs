//! The application module contract.
//!
//! A module is the replaceable half of the service: command handlers and
//! business rules. The host constructs it (from a shared-library artifact or
//! a static factory), walks it through the boot stages and, once promoted,
//! routes live events to the listeners it registered.
//!
//! Artifacts export their entry points with [`declare_module!`].

use crate::context::{BootContext, InitContext, PostInitContext};
use crate::exit::ExitCode;
use crate::stage::BootStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
pub use tracing::Dispatch;

/// ABI revision of the exported entry points. Bump whenever [`AppModule`],
/// the context types or the entry symbol signatures change.
pub const MODULE_ABI_VERSION: u32 = 2;

/// Symbol returning the artifact's [`MODULE_ABI_VERSION`].
pub const ABI_VERSION_SYMBOL: &[u8] = b"_hotline_module_abi_version";

/// Symbol constructing the module.
pub const CREATE_SYMBOL: &[u8] = b"_hotline_module_create";

/// Symbol handing the host's tracing dispatcher to the artifact.
pub const SET_DISPATCH_SYMBOL: &[u8] = b"_hotline_module_set_dispatch";

/// Thin-pointer box crossing the library boundary.
pub type ModuleBox = Box<dyn AppModule>;

/// Signature of [`CREATE_SYMBOL`]. Returns null if construction panicked.
pub type CreateModuleFn = unsafe extern "C" fn(host: *const HostHandle) -> *mut ModuleBox;

/// Signature of [`ABI_VERSION_SYMBOL`].
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;

/// Signature of [`SET_DISPATCH_SYMBOL`]. Returns `false` if the artifact
/// already had a dispatcher installed.
pub type SetDispatchFn = unsafe extern "C" fn(dispatch: *const Dispatch) -> bool;

/// Install `dispatch` as the global tracing dispatcher of the calling code
/// image.
///
/// A shared-library artifact links its own copy of `tracing`, with its own
/// global dispatcher slot. Until the host's dispatcher is installed there,
/// every event the module emits is dropped.
#[doc(hidden)]
pub fn install_dispatch(dispatch: &Dispatch) -> bool {
    match tracing::dispatcher::set_global_default(dispatch.clone()) {
        Ok(()) => {
            tracing::debug!("Host tracing dispatcher installed");
            true
        }
        Err(_) => false,
    }
}

/// Descriptive data about a module build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
}

impl ModuleMetadata {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// The context that asked for a reload, captured so the acknowledgment can
/// be sent back to it by whichever module ends up live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadOrigin {
    pub requested_by: String,
    /// Channel to acknowledge in. `None` for non-chat triggers (signals).
    pub channel_id: Option<String>,
    pub message_id: Option<String>,
    pub requested_at: DateTime<Utc>,
}

impl ReloadOrigin {
    /// A reload requested from a chat message.
    pub fn from_message(message: &crate::event::ChatMessage) -> Self {
        Self {
            requested_by: message.author_id.clone(),
            channel_id: Some(message.channel_id.clone()),
            message_id: Some(message.id.clone()),
            requested_at: Utc::now(),
        }
    }

    /// A reload requested by the operator outside the chat (e.g. SIGHUP).
    pub fn operator(source: impl Into<String>) -> Self {
        Self {
            requested_by: source.into(),
            channel_id: None,
            message_id: None,
            requested_at: Utc::now(),
        }
    }
}

/// Why a reload was abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[non_exhaustive]
pub enum ReloadFailure {
    /// Another reload is already running.
    Busy,
    /// The new module could not be loaded.
    Load { reason: String },
    /// A stage hook of the new module returned a non-success code.
    Stage { stage: BootStage, code: ExitCode },
    /// A stage hook did not return within the configured bound.
    TimedOut { stage: BootStage, after: Duration },
    /// The host invoked the dispatcher out of order. Always a bug.
    Protocol { reason: String },
}

impl fmt::Display for ReloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => f.write_str("another reload is already in progress"),
            Self::Load { reason } => write!(f, "module could not be loaded: {reason}"),
            Self::Stage { stage, code } => write!(f, "stage {stage} failed: {code}"),
            Self::TimedOut { stage, after } => {
                write!(f, "stage {stage} did not finish within {}s", after.as_secs())
            }
            Self::Protocol { reason } => write!(f, "internal dispatcher error: {reason}"),
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostControlError {
    /// The host control loop is no longer accepting requests.
    #[error("Host is shutting down")]
    Closed,
}

/// Host-level operations a module may invoke.
pub trait HostControl: Send + Sync {
    /// Ask the host to run a reload cycle. The caller is responsible for
    /// having authorized the requester.
    fn request_reload(&self, origin: ReloadOrigin) -> Result<(), HostControlError>;

    /// Ask the host to stop, exiting with `code`.
    fn request_shutdown(&self, code: ExitCode) -> Result<(), HostControlError>;
}

/// Shared handle passed to every module constructor.
pub type HostHandle = Arc<dyn HostControl>;

/// Lifecycle hooks of an application module.
///
/// Each hook runs at most once per instance, in stage order. A hook
/// returning anything other than [`ExitCode::Success`] stops the sequence:
/// the process exits on first boot, the reload is abandoned otherwise.
#[async_trait::async_trait]
pub trait AppModule: Send + Sync {
    fn metadata(&self) -> &ModuleMetadata;

    /// Read and validate the module's own configuration.
    fn create_configs(&mut self, path: &Path) -> ExitCode;

    /// Prepare everything that does not need the gateway connection.
    async fn pre_init(&mut self, boot: BootContext) -> ExitCode;

    /// Register listeners. During a reload they land in the staging set.
    async fn init(&mut self, ctx: InitContext) -> ExitCode;

    /// Start steady-state work. Runs only once this module is live.
    async fn post_init(&mut self, ctx: PostInitContext) -> ExitCode;

    /// Called on the live module when a reload it did not survive past was
    /// abandoned. The default does nothing.
    async fn reload_aborted(&self, _origin: &ReloadOrigin, _failure: &ReloadFailure) {}

    /// Stop background work before the instance is dropped.
    async fn shutdown(&mut self) {}
}

/// Export the entry points the host looks up in a module artifact.
///
/// `$constructor` is a `fn(HostHandle) -> $module_type`. A panicking
/// constructor is caught and reported to the host as a null module. The
/// host installs its tracing dispatcher through the exported setter before
/// constructing, so module logs land in the host's subscriber.
///
/// ```rust,ignore
/// hotline_kernel::declare_module!(ChatModule, ChatModule::new);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($module_type:ty, $constructor:path) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _hotline_module_abi_version() -> u32 {
            $crate::module::MODULE_ABI_VERSION
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _hotline_module_set_dispatch(
            dispatch: *const $crate::module::Dispatch,
        ) -> bool {
            if dispatch.is_null() {
                return false;
            }
            // SAFETY: the host passes a pointer to a live dispatcher for the
            // duration of this call; it is cloned before returning.
            $crate::module::install_dispatch(unsafe { &*dispatch })
        }

        #[unsafe(no_mangle)]
        pub extern "C" fn _hotline_module_create(
            host: *const $crate::module::HostHandle,
        ) -> *mut $crate::module::ModuleBox {
            if host.is_null() {
                return ::std::ptr::null_mut();
            }
            // SAFETY: the host passes a pointer to a live handle for the
            // duration of this call.
            let host: $crate::module::HostHandle = unsafe { (*host).clone() };
            let built = ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(move || {
                let module: $module_type = $constructor(host);
                module
            }));
            match built {
                Ok(module) => {
                    let boxed: $crate::module::ModuleBox = Box::new(module);
                    Box::into_raw(Box::new(boxed))
                }
                Err(_) => ::std::ptr::null_mut(),
            }
        }
    };
}
