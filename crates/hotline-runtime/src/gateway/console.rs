use super::{EVENT_BUFFER, GatewayConnection, GatewayConnector};
use hotline_kernel::{
    BootContext, ChatMessage, EventEnvelope, Gateway, GatewayEvent, GatewayResult,
    OutboundMessage, SessionInfo,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Local gateway: each stdin line is a message from the console user,
/// outbound messages are printed to stdout.
pub struct ConsoleGateway {
    session: SessionInfo,
    stdout: Mutex<tokio::io::Stdout>,
}

#[async_trait::async_trait]
impl Gateway for ConsoleGateway {
    fn session(&self) -> &SessionInfo {
        &self.session
    }

    async fn send(&self, message: OutboundMessage) -> GatewayResult<()> {
        let line = format!("[{}] {}\n", message.channel_id, message.content);
        let mut stdout = self.stdout.lock().await;
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConsoleConnector {
    self_user_id: String,
    user: String,
    channel: String,
}

impl ConsoleConnector {
    pub fn new(
        self_user_id: impl Into<String>,
        user: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            self_user_id: self_user_id.into(),
            user: user.into(),
            channel: channel.into(),
        }
    }
}

#[async_trait::async_trait]
impl GatewayConnector for ConsoleConnector {
    async fn connect(&self, boot: &BootContext) -> GatewayResult<GatewayConnection> {
        let session = SessionInfo {
            session_id: format!("console-{}", uuid::Uuid::new_v4()),
            shards: boot.shards().get(),
            self_user_id: self.self_user_id.clone(),
        };
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let ready = EventEnvelope::new(
            0,
            0,
            GatewayEvent::Ready {
                session_id: session.session_id.clone(),
            },
        );
        // The receiver is still in hand, so this cannot fail.
        let _ = tx.send(ready).await;

        let user = self.user.clone();
        let channel = self.channel.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut sequence = 0u64;
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => {
                        sequence += 1;
                        let message = ChatMessage::new(
                            format!("console-{sequence}"),
                            channel.as_str(),
                            user.as_str(),
                            line,
                        );
                        let envelope =
                            EventEnvelope::new(sequence, 0, GatewayEvent::MessageCreated(message));
                        if tx.send(envelope).await.is_err() {
                            debug!("Console reader stopped: dispatch loop is gone");
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("Console input closed");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Console read failed");
                        break;
                    }
                }
            }
        });

        info!(session = %session.session_id, "Console gateway connected");
        Ok(GatewayConnection {
            gateway: Arc::new(ConsoleGateway {
                session,
                stdout: Mutex::new(tokio::io::stdout()),
            }),
            events: rx,
        })
    }

    fn describe(&self) -> String {
        format!("console as '{}' in #{}", self.user, self.channel)
    }
}
