use crate::commands::CommandRouter;
use crate::config::ChatConfig;
use hotline_kernel::{
    AppModule, BootContext, ExitCode, Gateway, HostHandle, InitContext, ListenerId,
    ModuleMetadata, OutboundMessage, PostInitContext, ReloadFailure, ReloadOrigin,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The chat application module.
pub struct ChatModule {
    metadata: ModuleMetadata,
    host: HostHandle,
    config: Option<Arc<ChatConfig>>,
    boot: Option<BootContext>,
    gateway: Option<Arc<dyn Gateway>>,
    listeners: Vec<ListenerId>,
}

impl ChatModule {
    pub fn new(host: HostHandle) -> Self {
        Self {
            metadata: ModuleMetadata::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
                .with_description("Chat commands with admin-triggered hot reload"),
            host,
            config: None,
            boot: None,
            gateway: None,
            listeners: Vec::new(),
        }
    }

    pub fn config(&self) -> Option<&ChatConfig> {
        self.config.as_deref()
    }

    pub fn listeners(&self) -> &[ListenerId] {
        &self.listeners
    }

    /// Send to the channel a reload was requested from, if any.
    async fn acknowledge(&self, origin: &ReloadOrigin, content: String) {
        let (Some(gateway), Some(channel)) = (&self.gateway, &origin.channel_id) else {
            info!(requested_by = %origin.requested_by, "{content}");
            return;
        };
        let message = OutboundMessage {
            channel_id: channel.clone(),
            content,
            reply_to: origin.message_id.clone(),
        };
        if let Err(e) = gateway.send(message).await {
            warn!(error = %e, "Could not send reload acknowledgment");
        }
    }
}

#[async_trait::async_trait]
impl AppModule for ChatModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn create_configs(&mut self, path: &Path) -> ExitCode {
        match ChatConfig::load(path) {
            Ok(config) => {
                info!(
                    path = %path.display(),
                    prefix = %config.prefix,
                    admins = config.admins.len(),
                    "Chat config loaded"
                );
                self.config = Some(Arc::new(config));
                ExitCode::Success
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Chat config rejected");
                ExitCode::ConfigInvalid
            }
        }
    }

    async fn pre_init(&mut self, boot: BootContext) -> ExitCode {
        self.boot = Some(boot);
        ExitCode::Success
    }

    async fn init(&mut self, ctx: InitContext) -> ExitCode {
        let (Some(config), Some(boot)) = (self.config.clone(), self.boot.clone()) else {
            error!("init called before create_configs/pre_init");
            return ExitCode::Failure;
        };

        if let Err(e) = ctx.datastore.ping().await {
            if config.require_datastore {
                error!(error = %e, "Datastore unreachable");
                return ExitCode::DatastoreSetup;
            }
            warn!(error = %e, "Datastore unreachable, continuing without it");
        }

        let router = CommandRouter::new(
            config,
            self.metadata.clone(),
            boot,
            ctx.gateway.clone(),
            ctx.datastore.clone(),
            self.host.clone(),
        );
        self.listeners.push(ctx.listeners.register(Arc::new(router)));
        self.gateway = Some(ctx.gateway);
        ExitCode::Success
    }

    async fn post_init(&mut self, ctx: PostInitContext) -> ExitCode {
        info!(version = %self.metadata.version, "Chat module live");
        if let Some(origin) = &ctx.reload_origin {
            let ack = self
                .config
                .as_ref()
                .map(|c| c.reload_ack.clone())
                .unwrap_or_default();
            let content = match &ctx.previous_version {
                Some(previous) => format!("{ack}: {previous} -> {}", self.metadata.version),
                None => format!("{ack}: now {}", self.metadata.version),
            };
            self.acknowledge(origin, content).await;
        }
        ExitCode::Success
    }

    async fn reload_aborted(&self, origin: &ReloadOrigin, failure: &ReloadFailure) {
        let content = format!(
            "Reload failed: {failure}. Still running {}.",
            self.metadata.version
        );
        self.acknowledge(origin, content).await;
    }

    async fn shutdown(&mut self) {
        info!(version = %self.metadata.version, listeners = self.listeners.len(), "Chat module stopping");
        self.gateway = None;
    }
}
