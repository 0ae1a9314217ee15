//! Boot sequence and host lifecycle.

mod error;
mod events;
mod host;
mod sequencer;

pub use error::{BootError, BootFailure, BootResult, IntoBootReport};
pub use events::{ReloadEvent, ReloadOutcome, ReloadReport};
pub use host::Host;
pub use sequencer::{BootSequencer, HostParts, LiveModuleInfo};
