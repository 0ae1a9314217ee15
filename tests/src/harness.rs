use crate::journal::Journal;
use crate::scripted::ScriptedLoader;
use hotline_kernel::module::ModuleBox;
use hotline_modules::{ModuleLoader, StaticLoader};
use hotline_runtime::{
    BootFailure, GatewayKind, Host, HostParts, HostSettings, MemoryDatastore, MemoryGateway,
    ReloadEvent,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

/// Install a test subscriber once. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Formatted log output collected in memory, at every level.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A dispatcher writing into this capture.
    pub fn dispatch(&self) -> tracing::Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .with_writer(self.clone())
            .finish();
        tracing::Dispatch::new(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = LogCapture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Skip progress events until the reload ends, then return its final event.
pub async fn settle(
    events: &mut broadcast::Receiver<ReloadEvent>,
    within: Duration,
) -> anyhow::Result<ReloadEvent> {
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await? {
                event @ (ReloadEvent::Completed(_) | ReloadEvent::Aborted { .. }) => {
                    return Ok::<_, anyhow::Error>(event);
                }
                _ => continue,
            }
        }
    })
    .await?
}

/// In-process host collaborators plus the module config file.
pub struct TestHost {
    pub gateway: Arc<MemoryGateway>,
    pub datastore: Arc<MemoryDatastore>,
    pub journal: Journal,
    pub loader: Arc<ScriptedLoader>,
    module_config: NamedTempFile,
}

impl TestHost {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_module_config("{}\n")
    }

    /// `content` is written to the file handed to `create_configs`.
    pub fn with_module_config(content: &str) -> anyhow::Result<Self> {
        let mut module_config = tempfile::Builder::new().suffix(".yaml").tempfile()?;
        module_config.write_all(content.as_bytes())?;
        let journal = Journal::new();
        Ok(Self {
            gateway: MemoryGateway::new("hotline"),
            datastore: Arc::new(MemoryDatastore::new()),
            loader: Arc::new(ScriptedLoader::new(journal.clone())),
            journal,
            module_config,
        })
    }

    /// Rewrite the module config in place, as an operator would before a
    /// reload.
    pub fn rewrite_module_config(&self, content: &str) -> anyhow::Result<()> {
        std::fs::write(self.module_config.path(), content)?;
        Ok(())
    }

    pub fn settings(&self) -> HostSettings {
        let mut settings = HostSettings::default();
        settings.gateway.kind = GatewayKind::Memory;
        settings.module.config = self.module_config.path().to_path_buf();
        settings
    }

    /// Parts using the scripted loader.
    pub fn parts(&self) -> HostParts {
        self.parts_with(self.loader.clone())
    }

    /// Parts building the chat application module in-process.
    pub fn chat_parts(&self) -> HostParts {
        self.parts_with(Arc::new(StaticLoader::new("hotline-app", |host| {
            Box::new(hotline_app::ChatModule::new(host)) as ModuleBox
        })))
    }

    /// Parts using `loader` with the in-process gateway and datastore.
    pub fn parts_with(&self, loader: Arc<dyn ModuleLoader>) -> HostParts {
        HostParts {
            loader,
            connector: Arc::new(self.gateway.connector()),
            datastore: self.datastore.clone(),
        }
    }

    pub async fn boot(&self) -> Result<Host, BootFailure> {
        Host::start(self.settings(), self.parts()).await
    }

    pub async fn boot_with(&self, settings: HostSettings) -> Result<Host, BootFailure> {
        Host::start(settings, self.parts()).await
    }
}
