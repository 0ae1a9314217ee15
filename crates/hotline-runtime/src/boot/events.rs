//! Reload lifecycle notifications.

use hotline_kernel::{ExitCode, ReloadFailure, ReloadOrigin};
use serde::Serialize;
use std::time::Duration;

/// Broadcast by the sequencer at each step of a reload cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ReloadEvent {
    Started {
        reload_id: String,
        origin: ReloadOrigin,
    },
    /// The incoming module's listeners are being collected in staging.
    StagingQueued { reload_id: String, generation: u64 },
    Completed(ReloadReport),
    Aborted {
        reload_id: String,
        failure: ReloadFailure,
    },
}

impl ReloadEvent {
    pub fn reload_id(&self) -> &str {
        match self {
            Self::Started { reload_id, .. }
            | Self::StagingQueued { reload_id, .. }
            | Self::Aborted { reload_id, .. } => reload_id,
            Self::Completed(report) => &report.reload_id,
        }
    }
}

/// Summary of a reload that promoted a new module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadReport {
    pub reload_id: String,
    pub previous_version: Option<String>,
    pub version: String,
    /// Sha256 of the new artifact; `None` for linked modules.
    pub sha256: Option<String>,
    /// Active listener set generation after promotion.
    pub generation: u64,
    /// Listeners of the previous module that were detached.
    pub detached: usize,
    /// What the new module's `post_init` returned. The new module stays
    /// live either way.
    pub post_init: ExitCode,
    pub elapsed: Duration,
}

pub type ReloadOutcome = Result<ReloadReport, ReloadFailure>;
