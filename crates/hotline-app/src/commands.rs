//! Chat commands and the listener that serves them.

use crate::config::ChatConfig;
use hotline_kernel::{
    BootContext, ChatMessage, Datastore, EventEnvelope, EventListener, ExitCode, Gateway,
    HostHandle, ListenerError, ListenerResult, ModuleMetadata, OutboundMessage, ReloadOrigin,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Datastore key counting handled commands. Lives across reloads.
pub const COMMANDS_HANDLED_KEY: &str = "chat.commands_handled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Version,
    Uptime,
    Help,
    Reload,
    Shutdown,
    Unknown(String),
}

impl Command {
    /// `None` when `content` is not a command.
    pub fn parse(prefix: &str, content: &str) -> Option<Self> {
        let rest = content.trim().strip_prefix(prefix)?;
        let name = rest.split_whitespace().next()?.to_lowercase();
        Some(match name.as_str() {
            "ping" => Self::Ping,
            "version" => Self::Version,
            "uptime" => Self::Uptime,
            "help" => Self::Help,
            "reload" => Self::Reload,
            "shutdown" => Self::Shutdown,
            _ => Self::Unknown(name),
        })
    }

    pub fn requires_admin(&self) -> bool {
        matches!(self, Self::Reload | Self::Shutdown)
    }
}

pub fn format_uptime(uptime: chrono::Duration) -> String {
    let secs = uptime.num_seconds().max(0);
    let (days, rem) = (secs / 86_400, secs % 86_400);
    let (hours, rem) = (rem / 3_600, rem % 3_600);
    let (minutes, seconds) = (rem / 60, rem % 60);
    if days > 0 {
        format!("{days}d {hours}h {minutes}m {seconds}s")
    } else {
        format!("{hours}h {minutes}m {seconds}s")
    }
}

/// The module's only listener.
pub struct CommandRouter {
    config: Arc<ChatConfig>,
    metadata: ModuleMetadata,
    boot: BootContext,
    gateway: Arc<dyn Gateway>,
    datastore: Arc<dyn Datastore>,
    host: HostHandle,
    detached: AtomicBool,
}

impl CommandRouter {
    pub fn new(
        config: Arc<ChatConfig>,
        metadata: ModuleMetadata,
        boot: BootContext,
        gateway: Arc<dyn Gateway>,
        datastore: Arc<dyn Datastore>,
        host: HostHandle,
    ) -> Self {
        Self {
            config,
            metadata,
            boot,
            gateway,
            datastore,
            host,
            detached: AtomicBool::new(false),
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    async fn reply(&self, to: &ChatMessage, content: impl Into<String>) -> ListenerResult<()> {
        self.gateway.send(OutboundMessage::reply(to, content)).await?;
        Ok(())
    }

    async fn count_command(&self) -> ListenerResult<u64> {
        let handled = self
            .datastore
            .get(COMMANDS_HANDLED_KEY)
            .await?
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
            + 1;
        self.datastore
            .put(COMMANDS_HANDLED_KEY, serde_json::Value::from(handled))
            .await?;
        Ok(handled)
    }

    async fn handle(&self, message: &ChatMessage, command: Command) -> ListenerResult<()> {
        if command.requires_admin() && !self.config.is_admin(&message.author_id) {
            info!(author = %message.author_id, ?command, "Rejected admin command");
            return self
                .reply(message, "You are not allowed to do that.")
                .await;
        }

        match command {
            Command::Ping => self.reply(message, "pong").await,
            Command::Version => {
                let text = format!("{} {}", self.metadata.name, self.metadata.version);
                self.reply(message, text).await
            }
            Command::Uptime => {
                let text = format!("up {}", format_uptime(self.boot.uptime()));
                self.reply(message, text).await
            }
            Command::Help => {
                let p = &self.config.prefix;
                let text = format!(
                    "commands: {p}ping {p}version {p}uptime {p}help (admins: {p}reload {p}shutdown)"
                );
                self.reply(message, text).await
            }
            Command::Reload => {
                self.host
                    .request_reload(ReloadOrigin::from_message(message))
                    .map_err(|e| ListenerError::Failed(e.to_string()))?;
                self.reply(message, "Reloading...").await
            }
            Command::Shutdown => {
                self.reply(message, "Shutting down.").await?;
                self.host
                    .request_shutdown(ExitCode::Success)
                    .map_err(|e| ListenerError::Failed(e.to_string()))
            }
            Command::Unknown(name) => {
                let text = format!("Unknown command `{name}`. Try {}help", self.config.prefix);
                self.reply(message, text).await
            }
        }
    }
}

#[async_trait::async_trait]
impl EventListener for CommandRouter {
    fn name(&self) -> &str {
        "chat-commands"
    }

    async fn on_event(&self, envelope: &EventEnvelope) -> ListenerResult<()> {
        let Some(message) = envelope.event.as_message() else {
            return Ok(());
        };
        if message.author_id == self.gateway.session().self_user_id {
            return Ok(());
        }
        let Some(command) = Command::parse(&self.config.prefix, &message.content) else {
            return Ok(());
        };

        debug!(sequence = envelope.sequence, ?command, "Handling command");
        if let Err(e) = self.count_command().await {
            warn!(error = %e, "Could not record command");
        }
        self.handle(message, command).await
    }

    fn on_detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
        debug!(version = %self.metadata.version, "Command router detached");
    }
}
