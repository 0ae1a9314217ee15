//! The persistent gateway connection, as seen by modules.

use crate::event::OutboundMessage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    /// The connection could not be established.
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// The connection is closed; nothing more can be sent.
    #[error("Gateway connection closed")]
    Closed,

    /// Sending an outbound message failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Gateway I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Identity of the established gateway session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub shards: u32,
    /// User id the service acts as; listeners ignore their own messages.
    pub self_user_id: String,
}

/// Host-owned connection handle. Outlives every module instance; modules
/// only ever hold a shared reference to it.
#[async_trait::async_trait]
pub trait Gateway: Send + Sync {
    fn session(&self) -> &SessionInfo;

    async fn send(&self, message: OutboundMessage) -> GatewayResult<()>;
}
