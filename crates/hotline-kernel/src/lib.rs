//! Hotline Kernel
//!
//! The contract shared by the host process and every hot-reloadable
//! application module:
//!
//! - [`module::AppModule`]: the lifecycle hooks a module implements
//! - [`listener::EventListener`] / [`listener::ListenerRegistry`]: event handlers
//!   and the registration seam the host exposes to modules
//! - [`event`]: inbound gateway events and outbound messages
//! - [`context::BootContext`]: immutable values computed once per process
//! - [`exit::ExitCode`]: the stage result classification
//!
//! A module artifact and the host must be built against the same kernel
//! version; [`module::MODULE_ABI_VERSION`] is checked at load time.

// exit codes and stages
pub mod exit;
pub mod stage;
pub use exit::ExitCode;
pub use stage::BootStage;

// events
pub mod event;
pub use event::{ChatMessage, EventEnvelope, GatewayEvent, OutboundMessage};

// listeners
pub mod listener;
pub use listener::{EventListener, ListenerError, ListenerId, ListenerRegistry, ListenerResult};

// shared collaborators
pub mod datastore;
pub mod gateway;
pub use datastore::{Datastore, DatastoreError, DatastoreResult};
pub use gateway::{Gateway, GatewayError, GatewayResult, SessionInfo};

// boot context
pub mod context;
pub use context::{BootContext, Credential, HttpLimits, InitContext, PostInitContext, SharedHttp};

// module contract
pub mod module;
pub use module::{
    AppModule, HostControl, HostControlError, HostHandle, ModuleMetadata, ReloadFailure,
    ReloadOrigin,
};

// config module
#[cfg(feature = "config")]
pub mod config;
