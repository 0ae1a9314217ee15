use crate::journal::{Delivery, Hook, Journal};
use error_stack::Report;
use hotline_kernel::module::ModuleBox;
use hotline_kernel::{
    AppModule, BootContext, BootStage, EventEnvelope, EventListener, ExitCode, HostHandle,
    InitContext, ListenerId, ListenerResult, ModuleMetadata, PostInitContext, ReloadFailure,
    ReloadOrigin,
};
use hotline_modules::{LoadedModule, ModuleLoadError, ModuleLoadResult, ModuleLoader};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What a scripted module instance returns from each stage.
#[derive(Debug, Clone)]
pub struct Script {
    pub version: String,
    pub config: ExitCode,
    pub pre_init: ExitCode,
    pub init: ExitCode,
    pub post_init: ExitCode,
    /// Listeners registered during `init`.
    pub listeners: usize,
    /// Sleep inside `init`, after registering.
    pub init_delay: Option<Duration>,
}

impl Script {
    /// Every stage succeeds, one listener.
    pub fn healthy(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            config: ExitCode::Success,
            pre_init: ExitCode::Success,
            init: ExitCode::Success,
            post_init: ExitCode::Success,
            listeners: 1,
            init_delay: None,
        }
    }

    /// Fails `stage` with `code`. `Args` has no module hook and is ignored.
    pub fn failing(version: impl Into<String>, stage: BootStage, code: ExitCode) -> Self {
        let mut script = Self::healthy(version);
        match stage {
            BootStage::Args => {}
            BootStage::Config => script.config = code,
            BootStage::PreInit => script.pre_init = code,
            BootStage::Init => script.init = code,
            BootStage::PostInit => script.post_init = code,
        }
        script
    }

    pub fn with_listeners(mut self, listeners: usize) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn with_init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = Some(delay);
        self
    }
}

/// Records every event it receives.
pub struct RecordingListener {
    name: String,
    version: String,
    journal: Journal,
}

#[async_trait::async_trait]
impl EventListener for RecordingListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, envelope: &EventEnvelope) -> ListenerResult<()> {
        self.journal.delivered(Delivery {
            listener: self.name.clone(),
            version: self.version.clone(),
            sequence: envelope.sequence,
        });
        Ok(())
    }

    fn on_detach(&self) {
        self.journal.detach(&self.name);
    }
}

/// A module whose stage results come from a [`Script`].
pub struct ScriptedModule {
    metadata: ModuleMetadata,
    script: Script,
    journal: Journal,
    host: HostHandle,
    listeners: Vec<ListenerId>,
}

impl ScriptedModule {
    pub fn new(script: Script, journal: Journal, host: HostHandle) -> Self {
        Self {
            metadata: ModuleMetadata::new("scripted", script.version.clone()),
            script,
            journal,
            host,
            listeners: Vec::new(),
        }
    }

    pub fn host(&self) -> &HostHandle {
        &self.host
    }

    fn record(&self, hook: Hook) {
        self.journal.hook(&self.script.version, hook);
    }
}

#[async_trait::async_trait]
impl AppModule for ScriptedModule {
    fn metadata(&self) -> &ModuleMetadata {
        &self.metadata
    }

    fn create_configs(&mut self, _path: &Path) -> ExitCode {
        self.record(Hook::CreateConfigs);
        self.script.config
    }

    async fn pre_init(&mut self, _boot: BootContext) -> ExitCode {
        self.record(Hook::PreInit);
        self.script.pre_init
    }

    async fn init(&mut self, ctx: InitContext) -> ExitCode {
        self.record(Hook::Init);
        for n in 0..self.script.listeners {
            let listener = RecordingListener {
                name: format!("{}#{n}", self.script.version),
                version: self.script.version.clone(),
                journal: self.journal.clone(),
            };
            self.listeners.push(ctx.listeners.register(Arc::new(listener)));
        }
        if let Some(delay) = self.script.init_delay {
            tokio::time::sleep(delay).await;
        }
        self.script.init
    }

    async fn post_init(&mut self, ctx: PostInitContext) -> ExitCode {
        self.record(Hook::PostInit {
            origin: ctx.reload_origin,
            previous_version: ctx.previous_version,
        });
        self.script.post_init
    }

    async fn reload_aborted(&self, _origin: &ReloadOrigin, failure: &ReloadFailure) {
        self.record(Hook::ReloadAborted(failure.clone()));
    }

    async fn shutdown(&mut self) {
        self.record(Hook::Shutdown);
    }
}

enum Step {
    Build(Script),
    Fail(String),
}

/// Loader handing out scripted modules in the order they were queued.
///
/// Each `load` consumes one queued step; an empty queue is a load failure.
pub struct ScriptedLoader {
    steps: Mutex<VecDeque<Step>>,
    journal: Journal,
    loads: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new(journal: Journal) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            journal,
            loads: AtomicUsize::new(0),
        }
    }

    /// Queue the next instance.
    pub fn push(&self, script: Script) -> &Self {
        self.steps.lock().push_back(Step::Build(script));
        self
    }

    /// Make the next load fail.
    pub fn push_failure(&self, reason: impl Into<String>) -> &Self {
        self.steps.lock().push_back(Step::Fail(reason.into()));
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ModuleLoader for ScriptedLoader {
    async fn load(&self, host: HostHandle) -> ModuleLoadResult<LoadedModule> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Build(script)) => {
                let module: ModuleBox =
                    Box::new(ScriptedModule::new(script, self.journal.clone(), host));
                Ok(LoadedModule::linked(module))
            }
            Some(Step::Fail(reason)) => Err(Report::new(ModuleLoadError::CreationFailed(reason))),
            None => Err(Report::new(ModuleLoadError::CreationFailed(
                "no scripted module queued".to_string(),
            ))),
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
