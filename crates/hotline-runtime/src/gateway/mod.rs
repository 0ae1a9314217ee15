//! Gateway connectors
//!
//! A connector opens the one persistent connection the host keeps for its
//! whole life. It yields the shared [`Gateway`] handle modules send
//! through, plus the stream of inbound envelopes the host dispatches.

mod console;
mod memory;

pub use console::{ConsoleConnector, ConsoleGateway};
pub use memory::{MemoryConnector, MemoryGateway};

use hotline_kernel::{BootContext, EventEnvelope, Gateway, GatewayResult};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound buffer between a connection reader and the dispatch loop.
pub const EVENT_BUFFER: usize = 1024;

/// An established connection.
pub struct GatewayConnection {
    pub gateway: Arc<dyn Gateway>,
    pub events: mpsc::Receiver<EventEnvelope>,
}

impl std::fmt::Debug for GatewayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConnection")
            .field("session", self.gateway.session())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
pub trait GatewayConnector: Send + Sync {
    /// Open the connection. Called once, between the first `PreInit` and
    /// `Init`.
    async fn connect(&self, boot: &BootContext) -> GatewayResult<GatewayConnection>;

    fn describe(&self) -> String;
}
