//! Event listeners and the registration seam exposed to modules.

use crate::event::EventEnvelope;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Result type for listener callbacks.
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Errors a listener may report while handling an event.
///
/// They are logged and counted by the dispatcher, never retried and never
/// propagated past the delivery site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ListenerError {
    /// The listener could not handle the event.
    #[error("Listener failed: {0}")]
    Failed(String),

    /// Sending a reply through the gateway failed.
    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    /// A datastore call failed.
    #[error("Datastore error: {0}")]
    Datastore(#[from] crate::datastore::DatastoreError),
}

/// Process-unique listener handle returned by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Allocate the next id. Ids are never reused within a process.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// An inbound event handler.
#[async_trait::async_trait]
pub trait EventListener: Send + Sync {
    /// Name used in logs and delivery reports.
    fn name(&self) -> &str;

    /// Handle one event.
    async fn on_event(&self, envelope: &EventEnvelope) -> ListenerResult<()>;

    /// Called exactly once when the listener set holding this listener is
    /// retired, or when the listener is unregistered. Release per-listener
    /// resources here.
    fn on_detach(&self) {}
}

/// Where modules register their listeners.
///
/// The host decides which listener set a registration lands in; during a
/// reload that is the staging set, so the incoming module never receives
/// live traffic before it is promoted.
pub trait ListenerRegistry: Send + Sync {
    fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId;

    /// Remove a listener from whichever live set holds it. Returns `false`
    /// if the id is unknown or its set has already been retired.
    fn unregister(&self, id: ListenerId) -> bool;
}
