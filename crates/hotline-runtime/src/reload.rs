//! Reload trigger
//!
//! The entry point a module's command layer (or the operator, through a
//! signal) uses to ask for a reload. Requests are queued to the host
//! control loop, which runs each reload on its own task; the caller never
//! waits for the cycle. Authorization is the caller's job.

use hotline_kernel::{ExitCode, HostControl, HostControlError, HostHandle, ReloadOrigin};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Requests accepted by the host control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    Reload(ReloadOrigin),
    Shutdown(ExitCode),
}

/// Cloneable sender half of the host control channel.
#[derive(Debug, Clone)]
pub struct ReloadTrigger {
    tx: mpsc::UnboundedSender<ControlRequest>,
}

impl ReloadTrigger {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ControlRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue a reload. The outcome is acknowledged to `origin` by whichever
    /// module is live when the cycle ends.
    pub fn request_reload(&self, origin: ReloadOrigin) -> Result<(), HostControlError> {
        info!(requested_by = %origin.requested_by, "Reload requested");
        self.tx
            .send(ControlRequest::Reload(origin))
            .map_err(|_| HostControlError::Closed)
    }

    pub fn request_shutdown(&self, code: ExitCode) -> Result<(), HostControlError> {
        info!(code = code.code(), "Shutdown requested");
        self.tx
            .send(ControlRequest::Shutdown(code))
            .map_err(|_| HostControlError::Closed)
    }

    /// Handle passed to module constructors.
    pub fn handle(&self) -> HostHandle {
        Arc::new(self.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl HostControl for ReloadTrigger {
    fn request_reload(&self, origin: ReloadOrigin) -> Result<(), HostControlError> {
        ReloadTrigger::request_reload(self, origin)
    }

    fn request_shutdown(&self, code: ExitCode) -> Result<(), HostControlError> {
        ReloadTrigger::request_shutdown(self, code)
    }
}
