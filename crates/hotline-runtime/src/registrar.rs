//! Per-module registration handle.
//!
//! Every module instance gets its own [`ModuleRegistrar`] as the
//! `listeners` field of its `InitContext`. Registrations are forwarded to
//! the dispatcher and each listener is pinned to the module's code image,
//! so the image stays mapped until the last listener built from it is
//! dropped, including one held by an in-flight dispatch.

use crate::dispatch::SwapDispatcher;
use hotline_kernel::{EventEnvelope, EventListener, ListenerId, ListenerRegistry, ListenerResult};
use hotline_modules::ModuleImage;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Keeps a listener's code image alive.
struct PinnedListener {
    // Drops before the image.
    inner: Arc<dyn EventListener>,
    _image: Arc<ModuleImage>,
}

#[async_trait::async_trait]
impl EventListener for PinnedListener {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn on_event(&self, envelope: &EventEnvelope) -> ListenerResult<()> {
        self.inner.on_event(envelope).await
    }

    fn on_detach(&self) {
        self.inner.on_detach()
    }
}

pub struct ModuleRegistrar {
    dispatcher: Arc<SwapDispatcher>,
    image: Option<Arc<ModuleImage>>,
    module: String,
    registered: Mutex<Vec<ListenerId>>,
}

impl ModuleRegistrar {
    pub fn new(
        dispatcher: Arc<SwapDispatcher>,
        image: Option<Arc<ModuleImage>>,
        module: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            image,
            module: module.into(),
            registered: Mutex::new(Vec::new()),
        }
    }

    /// Ids registered through this handle, in order.
    pub fn registered(&self) -> Vec<ListenerId> {
        self.registered.lock().clone()
    }

    pub fn module(&self) -> &str {
        &self.module
    }
}

impl ListenerRegistry for ModuleRegistrar {
    fn register(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let listener = match &self.image {
            Some(image) => Arc::new(PinnedListener {
                inner: listener,
                _image: image.clone(),
            }) as Arc<dyn EventListener>,
            None => listener,
        };
        let id = self.dispatcher.register(listener);
        self.registered.lock().push(id);
        debug!(module = %self.module, listener = %id, "Module registered listener");
        id
    }

    fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.dispatcher.unregister(id);
        if removed {
            self.registered.lock().retain(|known| *known != id);
        }
        removed
    }
}

impl std::fmt::Debug for ModuleRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistrar")
            .field("module", &self.module)
            .field("pinned", &self.image.is_some())
            .field("registered", &self.registered.lock().len())
            .finish()
    }
}
