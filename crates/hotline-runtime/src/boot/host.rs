//! The host process: first boot, then the control loop.

use super::error::{BootError, BootFailure, IntoBootReport};
use super::events::ReloadEvent;
use super::sequencer::{BootSequencer, HostParts};
use crate::dispatch::SwapDispatcher;
use crate::reload::{ControlRequest, ReloadTrigger};
use crate::settings::{HostSettings, LaunchArgs};
use error_stack::ResultExt;
use hotline_kernel::{BootStage, EventEnvelope, ExitCode};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// A booted host, ready to [`run`](Host::run).
pub struct Host {
    sequencer: Arc<BootSequencer>,
    trigger: ReloadTrigger,
    control: mpsc::UnboundedReceiver<ControlRequest>,
    events: mpsc::Receiver<EventEnvelope>,
    completed: Vec<BootStage>,
}

impl Host {
    /// Run the `Args` stage against `args`, let `assemble` build the
    /// collaborators from the resolved settings, then boot.
    pub async fn boot<F>(args: &LaunchArgs, assemble: F) -> Result<Self, BootFailure>
    where
        F: FnOnce(&HostSettings) -> super::BootResult<HostParts>,
    {
        let settings = args
            .resolve()
            .map_err(BootError::from)
            .into_report()
            .attach("resolving launch arguments")?;
        let parts = assemble(&settings)?;
        Self::start(settings, parts).await
    }

    /// Boot with already-resolved settings.
    pub async fn start(settings: HostSettings, parts: HostParts) -> Result<Self, BootFailure> {
        debug!(stage = %BootStage::Args, "Boot stage started");
        settings.validate().map_err(BootError::from).into_report()?;
        let mut completed = vec![BootStage::Args];

        let (trigger, control) = ReloadTrigger::channel();
        let sequencer = Arc::new(BootSequencer::new(
            Arc::new(settings),
            parts,
            trigger.handle(),
        ));
        let events = sequencer.first_boot(&mut completed).await?;

        Ok(Self {
            sequencer,
            trigger,
            control,
            events,
            completed,
        })
    }

    /// Stages the first boot completed, in order.
    pub fn completed_stages(&self) -> &[BootStage] {
        &self.completed
    }

    pub fn trigger(&self) -> ReloadTrigger {
        self.trigger.clone()
    }

    pub fn sequencer(&self) -> Arc<BootSequencer> {
        self.sequencer.clone()
    }

    pub fn dispatcher(&self) -> Arc<SwapDispatcher> {
        self.sequencer.dispatcher().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.sequencer.subscribe()
    }

    /// Dispatch inbound events and serve control requests until a shutdown
    /// is requested or the gateway stream ends. Each event is dispatched on
    /// its own task; each reload runs on its own task.
    pub async fn run(self) -> ExitCode {
        let Self {
            sequencer,
            trigger,
            mut control,
            mut events,
            ..
        } = self;
        let dispatcher = sequencer.dispatcher().clone();
        let mut deliveries = JoinSet::new();
        let mut reloads = JoinSet::new();
        info!("Host running");

        let code = loop {
            tokio::select! {
                request = control.recv() => match request {
                    Some(ControlRequest::Reload(origin)) => {
                        let sequencer = sequencer.clone();
                        reloads.spawn(async move {
                            let _ = sequencer.reload(origin).await;
                        });
                    }
                    Some(ControlRequest::Shutdown(code)) => {
                        info!(code = code.code(), "Shutdown requested");
                        break code;
                    }
                    None => break ExitCode::Success,
                },
                envelope = events.recv() => match envelope {
                    Some(envelope) => {
                        let dispatcher = dispatcher.clone();
                        deliveries.spawn(async move { dispatcher.dispatch(Arc::new(envelope)).await });
                    }
                    None => {
                        info!("Gateway event stream ended");
                        break ExitCode::Success;
                    }
                },
                Some(joined) = deliveries.join_next(), if !deliveries.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Delivery task failed");
                    }
                }
                Some(_) = reloads.join_next(), if !reloads.is_empty() => {}
            }
        };

        while deliveries.join_next().await.is_some() {}
        sequencer.shutdown().await;
        reloads.abort_all();
        drop(trigger);

        info!(code = code.code(), "Host stopped");
        code
    }
}
