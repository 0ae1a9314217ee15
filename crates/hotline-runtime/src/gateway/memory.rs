use super::{EVENT_BUFFER, GatewayConnection, GatewayConnector};
use hotline_kernel::{
    BootContext, ChatMessage, EventEnvelope, Gateway, GatewayError, GatewayEvent, GatewayResult,
    OutboundMessage, SessionInfo,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

/// In-process gateway. The embedder injects inbound events and inspects
/// what the service sent back.
pub struct MemoryGateway {
    session: SessionInfo,
    inbound: Mutex<Option<mpsc::Sender<EventEnvelope>>>,
    pending: Mutex<Option<mpsc::Receiver<EventEnvelope>>>,
    sequence: AtomicU64,
    refuse_connect: AtomicBool,
    sent: Mutex<Vec<OutboundMessage>>,
    sent_notify: Notify,
}

impl MemoryGateway {
    pub fn new(self_user_id: impl Into<String>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Arc::new(Self {
            session: SessionInfo {
                session_id: format!("memory-{}", uuid::Uuid::new_v4()),
                shards: 1,
                self_user_id: self_user_id.into(),
            },
            inbound: Mutex::new(Some(tx)),
            pending: Mutex::new(Some(rx)),
            sequence: AtomicU64::new(0),
            refuse_connect: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            sent_notify: Notify::new(),
        })
    }

    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector {
            gateway: self.clone(),
        }
    }

    /// Make the next `connect` fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse_connect.store(refuse, Ordering::SeqCst);
    }

    /// Queue an inbound event. Returns its sequence number.
    pub async fn inject(&self, event: GatewayEvent) -> GatewayResult<u64> {
        let sender = self.inbound.lock().clone().ok_or(GatewayError::Closed)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        sender
            .send(EventEnvelope::new(sequence, 0, event))
            .await
            .map_err(|_| GatewayError::Closed)?;
        Ok(sequence)
    }

    /// Inject a chat message from `author` in `channel`.
    pub async fn say(
        &self,
        channel: &str,
        author: &str,
        content: &str,
    ) -> GatewayResult<u64> {
        let id = format!("msg-{}", self.sequence.load(Ordering::SeqCst) + 1);
        let message = ChatMessage::new(id, channel, author, content);
        self.inject(GatewayEvent::MessageCreated(message)).await
    }

    /// End the inbound stream. The host's run loop then stops.
    pub fn close(&self) {
        self.inbound.lock().take();
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Wait until at least `count` messages were sent or `within` elapsed,
    /// then return everything sent so far.
    pub async fn wait_for_sent(&self, count: usize, within: Duration) -> Vec<OutboundMessage> {
        let _ = tokio::time::timeout(within, async {
            loop {
                let notified = self.sent_notify.notified();
                if self.sent.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await;
        self.sent()
    }
}

#[async_trait::async_trait]
impl Gateway for MemoryGateway {
    fn session(&self) -> &SessionInfo {
        &self.session
    }

    async fn send(&self, message: OutboundMessage) -> GatewayResult<()> {
        debug!(channel = %message.channel_id, "Memory gateway captured message");
        self.sent.lock().push(message);
        self.sent_notify.notify_waiters();
        Ok(())
    }
}

/// Connector handing out a [`MemoryGateway`]. Connects at most once.
#[derive(Clone)]
pub struct MemoryConnector {
    gateway: Arc<MemoryGateway>,
}

#[async_trait::async_trait]
impl GatewayConnector for MemoryConnector {
    async fn connect(&self, _boot: &BootContext) -> GatewayResult<GatewayConnection> {
        if self.gateway.refuse_connect.load(Ordering::SeqCst) {
            return Err(GatewayError::ConnectFailed(
                "memory gateway refused the connection".to_string(),
            ));
        }
        let events = self.gateway.pending.lock().take().ok_or_else(|| {
            GatewayError::ConnectFailed("memory gateway is already connected".to_string())
        })?;
        Ok(GatewayConnection {
            gateway: self.gateway.clone(),
            events,
        })
    }

    fn describe(&self) -> String {
        format!("memory session {}", self.gateway.session.session_id)
    }
}
