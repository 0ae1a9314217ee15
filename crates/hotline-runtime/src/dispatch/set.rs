use hotline_kernel::{EventListener, ListenerId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

struct SetInner {
    listeners: BTreeMap<ListenerId, Arc<dyn EventListener>>,
    retired: bool,
}

/// A group of listeners owned by one dispatcher slot.
///
/// Once retired a set is empty forever: later insertions are refused and
/// handed back, so nothing can be registered into a set nobody delivers to.
pub(crate) struct ListenerSet {
    generation: u64,
    inner: RwLock<SetInner>,
}

impl ListenerSet {
    pub(crate) fn new(generation: u64) -> Self {
        Self {
            generation,
            inner: RwLock::new(SetInner {
                listeners: BTreeMap::new(),
                retired: false,
            }),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Insert unless retired; a retired set returns the listener.
    pub(crate) fn insert(
        &self,
        id: ListenerId,
        listener: Arc<dyn EventListener>,
    ) -> Result<(), Arc<dyn EventListener>> {
        let mut inner = self.inner.write();
        if inner.retired {
            return Err(listener);
        }
        inner.listeners.insert(id, listener);
        Ok(())
    }

    pub(crate) fn remove(&self, id: ListenerId) -> Option<Arc<dyn EventListener>> {
        self.inner.write().listeners.remove(&id)
    }

    /// Listeners in registration order.
    pub(crate) fn snapshot(&self) -> Vec<(ListenerId, Arc<dyn EventListener>)> {
        self.inner
            .read()
            .listeners
            .iter()
            .map(|(id, l)| (*id, l.clone()))
            .collect()
    }

    pub(crate) fn ids(&self) -> Vec<ListenerId> {
        self.inner.read().listeners.keys().copied().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().listeners.len()
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.inner.read().retired
    }

    /// Mark retired and drain. Returns what was drained so the caller can
    /// detach it outside the lock.
    pub(crate) fn retire(&self) -> Vec<(ListenerId, Arc<dyn EventListener>)> {
        let mut inner = self.inner.write();
        inner.retired = true;
        std::mem::take(&mut inner.listeners).into_iter().collect()
    }
}
