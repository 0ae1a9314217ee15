//! Hotline App
//!
//! Sample application module. Built as a `cdylib` it is a reloadable
//! artifact (`libhotline_app.so`, renamed to `libchat-<version>.so` when
//! deployed); built as an `rlib` the host links it directly in builtin mode.

pub mod commands;
pub mod config;
mod module;

pub use commands::{COMMANDS_HANDLED_KEY, Command, CommandRouter};
pub use config::{ChatConfig, ChatConfigError};
pub use module::ChatModule;

hotline_kernel::declare_module!(ChatModule, ChatModule::new);
