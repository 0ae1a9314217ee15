//! Boot sequencer
//!
//! Drives module instances through `Args → Config → PreInit → Init →
//! PostInit`. The first boot walks every stage against the first instance
//! and any failure ends the process. A reload walks `Config → PreInit →
//! Init` against a fresh instance while the current one stays live, with
//! the new listeners collected in the dispatcher's staging set; only after
//! the staging set is promoted does the new instance get its `PostInit`.
//! A failing reload discards the staging set and leaves the live module
//! untouched.

use super::error::{BootError, BootResult, IntoBootReport};
use super::events::{ReloadEvent, ReloadOutcome, ReloadReport};
use crate::dispatch::SwapDispatcher;
use crate::gateway::GatewayConnector;
use crate::registrar::ModuleRegistrar;
use crate::settings::HostSettings;
use chrono::{DateTime, Utc};
use error_stack::{Report, ResultExt};
use hotline_kernel::{
    BootContext, BootStage, Datastore, EventEnvelope, ExitCode, Gateway, HostHandle, InitContext,
    ListenerId, ModuleMetadata, PostInitContext, ReloadFailure, ReloadOrigin, SharedHttp,
};
use hotline_modules::{ArtifactInfo, LoadedModule, ModuleLoader};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, error, info, warn};

const EVENT_CAPACITY: usize = 64;

/// Collaborators assembled by the embedder after the settings are known.
#[derive(Clone)]
pub struct HostParts {
    pub loader: Arc<dyn ModuleLoader>,
    pub connector: Arc<dyn GatewayConnector>,
    pub datastore: Arc<dyn Datastore>,
}

impl std::fmt::Debug for HostParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostParts")
            .field("loader", &self.loader.describe())
            .field("connector", &self.connector.describe())
            .finish_non_exhaustive()
    }
}

/// The module that owns the active listener set.
struct LiveModule {
    registrar: Arc<ModuleRegistrar>,
    loaded: LoadedModule,
}

/// Snapshot of the live module.
#[derive(Debug, Clone)]
pub struct LiveModuleInfo {
    pub metadata: ModuleMetadata,
    pub instance_id: String,
    pub artifact: Option<ArtifactInfo>,
    pub listeners: Vec<ListenerId>,
}

/// A new instance whose `Init` succeeded, waiting for promotion.
struct Staged {
    loaded: LoadedModule,
    registrar: Arc<ModuleRegistrar>,
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: tokio::time::Instant,
    limit: Duration,
}

async fn bounded<F: Future>(
    deadline: Option<Deadline>,
    stage: BootStage,
    fut: F,
) -> Result<F::Output, ReloadFailure> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline.at, fut)
            .await
            .map_err(|_| ReloadFailure::TimedOut {
                stage,
                after: deadline.limit,
            }),
        None => Ok(fut.await),
    }
}

fn check(stage: BootStage, code: ExitCode) -> Result<(), BootError> {
    if code.is_success() {
        Ok(())
    } else {
        Err(BootError::Stage { stage, code })
    }
}

/// The failure of a bounded reload stage, if it did not succeed.
fn stage_failure(
    stage: BootStage,
    outcome: Result<ExitCode, ReloadFailure>,
) -> Option<ReloadFailure> {
    match outcome {
        Ok(code) if code.is_success() => None,
        Ok(code) => Some(ReloadFailure::Stage { stage, code }),
        Err(timed_out) => Some(timed_out),
    }
}

pub struct BootSequencer {
    settings: Arc<HostSettings>,
    parts: HostParts,
    dispatcher: Arc<SwapDispatcher>,
    host: HostHandle,
    started_at: DateTime<Utc>,
    boot: OnceLock<BootContext>,
    gateway: OnceLock<Arc<dyn Gateway>>,
    live: Mutex<Option<LiveModule>>,
    /// Held for the whole of a reload cycle.
    reload_gate: Mutex<()>,
    events: broadcast::Sender<ReloadEvent>,
}

impl BootSequencer {
    pub fn new(settings: Arc<HostSettings>, parts: HostParts, host: HostHandle) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            parts,
            dispatcher: Arc::new(SwapDispatcher::new()),
            host,
            started_at: Utc::now(),
            boot: OnceLock::new(),
            gateway: OnceLock::new(),
            live: Mutex::new(None),
            reload_gate: Mutex::new(()),
            events,
        }
    }

    pub fn settings(&self) -> &HostSettings {
        &self.settings
    }

    pub fn dispatcher(&self) -> &Arc<SwapDispatcher> {
        &self.dispatcher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.events.subscribe()
    }

    /// `None` until the first `PreInit` started.
    pub fn boot_context(&self) -> Option<&BootContext> {
        self.boot.get()
    }

    pub fn gateway(&self) -> Option<Arc<dyn Gateway>> {
        self.gateway.get().cloned()
    }

    pub fn is_reloading(&self) -> bool {
        self.reload_gate.try_lock().is_err()
    }

    pub async fn live_module(&self) -> Option<LiveModuleInfo> {
        self.live.lock().await.as_ref().map(|live| LiveModuleInfo {
            metadata: live.loaded.metadata().clone(),
            instance_id: live.loaded.instance_id().to_string(),
            artifact: live.loaded.artifact().cloned(),
            listeners: live.registrar.registered(),
        })
    }

    /// The boot context, built on first use and reused by every reload.
    fn boot_context_or_init(&self) -> BootResult<BootContext> {
        if let Some(boot) = self.boot.get() {
            return Ok(boot.clone());
        }
        let shards = self
            .settings
            .shards()
            .map_err(BootError::from)
            .into_report()?;
        let http = SharedHttp::new(self.settings.http)
            .map_err(|e| BootError::Http(e.to_string()))
            .into_report()?;
        let boot = BootContext::new(shards, self.settings.gateway.token.clone(), http)
            .with_started_at(self.started_at);
        Ok(self.boot.get_or_init(|| boot).clone())
    }

    fn registrar_for(&self, loaded: &LoadedModule) -> Arc<ModuleRegistrar> {
        let label = format!(
            "{}@{}",
            loaded.metadata().name,
            loaded.metadata().version
        );
        Arc::new(ModuleRegistrar::new(
            self.dispatcher.clone(),
            loaded.image(),
            label,
        ))
    }

    fn init_context(
        &self,
        gateway: Arc<dyn Gateway>,
        registrar: Arc<ModuleRegistrar>,
    ) -> InitContext {
        InitContext {
            gateway,
            datastore: self.parts.datastore.clone(),
            listeners: registrar,
        }
    }

    /// Stop a module's background work, bounded by the reload timeout.
    async fn shutdown_module(&self, loaded: &mut LoadedModule) {
        let instance = loaded.instance_id().to_string();
        let shutdown = loaded.module_mut().shutdown();
        match self.settings.reload_timeout() {
            Some(limit) => {
                if tokio::time::timeout(limit, shutdown).await.is_err() {
                    warn!(%instance, "Module shutdown did not finish in time");
                }
            }
            None => shutdown.await,
        }
    }

    // ----- first boot -------------------------------------------------------

    /// Run `Config → PreInit → (connect) → Init → PostInit` against the first
    /// instance. `completed` receives each stage as it succeeds. Returns the
    /// inbound event stream of the new gateway connection.
    pub(crate) async fn first_boot(
        &self,
        completed: &mut Vec<BootStage>,
    ) -> BootResult<mpsc::Receiver<EventEnvelope>> {
        info!(loader = %self.parts.loader.describe(), "Loading module");
        let mut loaded = self
            .parts
            .loader
            .load(self.host.clone())
            .await
            .change_context(BootError::ModuleLoad(self.parts.loader.describe()))?;
        info!(
            module = %loaded.metadata().name,
            version = %loaded.metadata().version,
            "Module loaded"
        );

        let (events, registrar) = match self.first_boot_stages(&mut loaded, completed).await {
            Ok(ready) => ready,
            Err(report) => {
                self.dispatcher.detach_everything();
                self.shutdown_module(&mut loaded).await;
                return Err(report);
            }
        };

        let mut live = self.live.lock().await;
        let current = live.insert(LiveModule { registrar, loaded });

        debug!(stage = %BootStage::PostInit, "Boot stage started");
        let code = current
            .loaded
            .module_mut()
            .post_init(PostInitContext::default())
            .await;
        if let Err(e) = check(BootStage::PostInit, code) {
            if let Some(mut failed) = live.take() {
                self.dispatcher.detach_everything();
                self.shutdown_module(&mut failed.loaded).await;
            }
            return Err(Report::new(e));
        }
        completed.push(BootStage::PostInit);

        info!(
            listeners = self.dispatcher.active_len(),
            "Boot complete, module is live"
        );
        Ok(events)
    }

    async fn first_boot_stages(
        &self,
        loaded: &mut LoadedModule,
        completed: &mut Vec<BootStage>,
    ) -> BootResult<(mpsc::Receiver<EventEnvelope>, Arc<ModuleRegistrar>)> {
        let config_path = &self.settings.module.config;
        debug!(stage = %BootStage::Config, path = %config_path.display(), "Boot stage started");
        let code = loaded.module_mut().create_configs(config_path);
        check(BootStage::Config, code)
            .into_report()
            .attach(format!("module config: {}", config_path.display()))?;
        completed.push(BootStage::Config);

        debug!(stage = %BootStage::PreInit, "Boot stage started");
        let boot = self.boot_context_or_init()?;
        let code = loaded.module_mut().pre_init(boot.clone()).await;
        check(BootStage::PreInit, code).into_report()?;
        completed.push(BootStage::PreInit);

        info!(connector = %self.parts.connector.describe(), "Connecting gateway");
        let connection = self
            .parts
            .connector
            .connect(&boot)
            .await
            .map_err(|e| BootError::Connection(e.to_string()))
            .into_report()
            .attach(self.parts.connector.describe())?;
        let gateway = self.gateway.get_or_init(|| connection.gateway.clone()).clone();
        info!(session = %gateway.session().session_id, shards = gateway.session().shards, "Gateway connected");

        debug!(stage = %BootStage::Init, "Boot stage started");
        let registrar = self.registrar_for(loaded);
        let ctx = self.init_context(gateway, registrar.clone());
        let code = loaded.module_mut().init(ctx).await;
        check(BootStage::Init, code).into_report()?;
        completed.push(BootStage::Init);

        Ok((connection.events, registrar))
    }

    // ----- reload -----------------------------------------------------------

    /// Replace the live module with a freshly loaded instance.
    ///
    /// Always acknowledged: on success the new module's `post_init` receives
    /// `origin`; on failure the live module's `reload_aborted` does.
    pub async fn reload(&self, origin: ReloadOrigin) -> ReloadOutcome {
        let reload_id = uuid::Uuid::now_v7().to_string();
        let Ok(_gate) = self.reload_gate.try_lock() else {
            return Err(self.abort(reload_id, &origin, ReloadFailure::Busy).await);
        };

        let (Some(boot), Some(gateway)) = (self.boot.get().cloned(), self.gateway()) else {
            let failure = ReloadFailure::Protocol {
                reason: "reload requested before the first boot completed".to_string(),
            };
            return Err(self.abort(reload_id, &origin, failure).await);
        };

        info!(%reload_id, requested_by = %origin.requested_by, "Reload started");
        let _ = self.events.send(ReloadEvent::Started {
            reload_id: reload_id.clone(),
            origin: origin.clone(),
        });

        let started = Instant::now();
        let deadline = self.settings.reload_timeout().map(|limit| Deadline {
            at: tokio::time::Instant::now() + limit,
            limit,
        });

        match self.prepare(&reload_id, boot, gateway, deadline).await {
            Ok(staged) => self.commit(reload_id, origin, staged, started).await,
            Err(failure) => Err(self.abort(reload_id, &origin, failure).await),
        }
    }

    /// Queue staging, then load the new instance and run it up to and
    /// including `Init`. Any failure discards staging before the new
    /// instance is shut down.
    async fn prepare(
        &self,
        reload_id: &str,
        boot: BootContext,
        gateway: Arc<dyn Gateway>,
        deadline: Option<Deadline>,
    ) -> Result<Staged, ReloadFailure> {
        let generation = self.dispatcher.queue_staging().map_err(|e| {
            error!(reload_id, error = %e, "Dispatcher protocol violation while queueing staging");
            ReloadFailure::Protocol {
                reason: e.to_string(),
            }
        })?;
        let _ = self.events.send(ReloadEvent::StagingQueued {
            reload_id: reload_id.to_string(),
            generation,
        });

        let (failure, loaded) = match self
            .stage_incoming(reload_id, boot, gateway, deadline)
            .await
        {
            Ok(staged) => return Ok(staged),
            Err(failed) => failed,
        };

        if let Err(e) = self.dispatcher.unqueue_staging() {
            error!(reload_id, error = %e, "Dispatcher protocol violation while discarding staging");
        }
        if let Some(mut loaded) = loaded {
            self.shutdown_module(&mut loaded).await;
        }
        Err(failure)
    }

    /// Load, `Config`, `PreInit` and `Init` of the incoming instance. On
    /// failure the instance is handed back, if it was built, for teardown.
    async fn stage_incoming(
        &self,
        reload_id: &str,
        boot: BootContext,
        gateway: Arc<dyn Gateway>,
        deadline: Option<Deadline>,
    ) -> Result<Staged, (ReloadFailure, Option<LoadedModule>)> {
        let loaded = bounded(
            deadline,
            BootStage::Config,
            self.parts.loader.load(self.host.clone()),
        )
        .await
        .map_err(|timed_out| (timed_out, None))?;
        let mut loaded = loaded.map_err(|report| {
            warn!(reload_id, error = ?report, "Incoming module could not be loaded");
            let failure = ReloadFailure::Load {
                reason: report.current_context().to_string(),
            };
            (failure, None)
        })?;
        info!(
            reload_id,
            module = %loaded.metadata().name,
            version = %loaded.metadata().version,
            sha256 = loaded.artifact().map(|a| a.sha256.as_str()).unwrap_or("linked"),
            "Incoming module loaded"
        );

        let code = loaded.module_mut().create_configs(&self.settings.module.config);
        if !code.is_success() {
            let failure = ReloadFailure::Stage {
                stage: BootStage::Config,
                code,
            };
            return Err((failure, Some(loaded)));
        }

        let pre_init = bounded(
            deadline,
            BootStage::PreInit,
            loaded.module_mut().pre_init(boot),
        )
        .await;
        if let Some(failure) = stage_failure(BootStage::PreInit, pre_init) {
            return Err((failure, Some(loaded)));
        }

        let registrar = self.registrar_for(&loaded);
        let ctx = self.init_context(gateway, registrar.clone());
        let init = bounded(deadline, BootStage::Init, loaded.module_mut().init(ctx)).await;
        if let Some(failure) = stage_failure(BootStage::Init, init) {
            return Err((failure, Some(loaded)));
        }

        Ok(Staged { loaded, registrar })
    }

    /// Promote the staged instance, retire the old one, run `PostInit`.
    async fn commit(
        &self,
        reload_id: String,
        origin: ReloadOrigin,
        staged: Staged,
        started: Instant,
    ) -> ReloadOutcome {
        let Staged {
            mut loaded,
            registrar,
        } = staged;

        let promotion = match self.dispatcher.promote_staging() {
            Ok(promotion) => promotion,
            Err(e) => {
                error!(%reload_id, error = %e, "Dispatcher protocol violation while promoting staging");
                self.shutdown_module(&mut loaded).await;
                let failure = ReloadFailure::Protocol {
                    reason: e.to_string(),
                };
                return Err(self.abort(reload_id, &origin, failure).await);
            }
        };

        let version = loaded.metadata().version.clone();
        let sha256 = loaded.artifact().map(|a| a.sha256.clone());

        let mut live = self.live.lock().await;
        let previous = live.replace(LiveModule { registrar, loaded });
        let previous_version = previous
            .as_ref()
            .map(|old| old.loaded.metadata().version.clone());
        if let Some(mut old) = previous {
            self.shutdown_module(&mut old.loaded).await;
            info!(
                %reload_id,
                instance = old.loaded.instance_id(),
                "Previous module retired"
            );
        }

        let post_init = match live.as_mut() {
            Some(current) => {
                current
                    .loaded
                    .module_mut()
                    .post_init(PostInitContext {
                        reload_origin: Some(origin),
                        previous_version: previous_version.clone(),
                    })
                    .await
            }
            None => ExitCode::Failure,
        };
        drop(live);
        if !post_init.is_success() {
            warn!(%reload_id, code = %post_init, "New module's post_init failed; it stays live");
        }

        let report = ReloadReport {
            reload_id,
            previous_version,
            version,
            sha256,
            generation: promotion.generation,
            detached: promotion.detached,
            post_init,
            elapsed: started.elapsed(),
        };
        info!(
            reload_id = %report.reload_id,
            version = %report.version,
            previous = report.previous_version.as_deref().unwrap_or("-"),
            generation = report.generation,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Reload complete"
        );
        let _ = self.events.send(ReloadEvent::Completed(report.clone()));
        Ok(report)
    }

    /// Report a failed reload to the live module and to observers.
    async fn abort(
        &self,
        reload_id: String,
        origin: &ReloadOrigin,
        failure: ReloadFailure,
    ) -> ReloadFailure {
        warn!(
            %reload_id,
            requested_by = %origin.requested_by,
            %failure,
            "Reload aborted, previous module stays live"
        );
        if let Some(live) = self.live.lock().await.as_ref() {
            live.loaded.module().reload_aborted(origin, &failure).await;
        }
        let _ = self.events.send(ReloadEvent::Aborted {
            reload_id,
            failure: failure.clone(),
        });
        failure
    }

    // ----- shutdown ---------------------------------------------------------

    /// Detach every listener and stop the live module. Waits for a running
    /// reload to finish first.
    pub async fn shutdown(&self) {
        let _gate = match self.settings.reload_timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.reload_gate.lock()).await {
                Ok(gate) => Some(gate),
                Err(_) => {
                    warn!("Reload still running at shutdown, not waiting for it");
                    None
                }
            },
            None => Some(self.reload_gate.lock().await),
        };

        let detached = self.dispatcher.detach_everything();
        let live = self.live.lock().await.take();
        if let Some(mut live) = live {
            self.shutdown_module(&mut live.loaded).await;
            info!(
                module = %live.loaded.metadata().name,
                detached,
                "Live module stopped"
            );
        }
    }
}
