//! Hotline Runtime
//!
//! The host side of the hot-reload service:
//!
//! - [`dispatch::SwapDispatcher`]: event routing with an atomically
//!   promotable staging listener set
//! - [`boot`]: the five-stage boot sequence, reload cycles and the host
//!   control loop
//! - [`reload::ReloadTrigger`]: how modules and operators ask for a reload
//! - [`gateway`] / [`datastore`]: host-owned collaborators that outlive every
//!   module instance
//! - [`settings`]: host configuration

pub mod boot;
pub mod datastore;
pub mod dispatch;
pub mod gateway;
pub mod registrar;
pub mod reload;
pub mod settings;

pub use boot::{
    BootError, BootFailure, BootResult, BootSequencer, Host, HostParts, LiveModuleInfo,
    ReloadEvent, ReloadOutcome, ReloadReport,
};
pub use datastore::MemoryDatastore;
pub use dispatch::{
    DeliveryReport, DeliveryStats, DispatchError, DispatcherState, Promotion, SwapDispatcher,
};
pub use gateway::{
    ConsoleConnector, GatewayConnection, GatewayConnector, MemoryConnector, MemoryGateway,
};
pub use registrar::ModuleRegistrar;
pub use reload::{ControlRequest, ReloadTrigger};
pub use settings::{GatewayKind, HostSettings, LaunchArgs, SettingsError};
