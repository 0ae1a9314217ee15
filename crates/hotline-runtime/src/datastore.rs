//! In-process datastore.

use dashmap::DashMap;
use hotline_kernel::{Datastore, DatastoreError, DatastoreResult};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};

/// [`Datastore`] backed by a concurrent map. Contents live as long as the
/// host process, so they survive reloads.
#[derive(Debug)]
pub struct MemoryDatastore {
    entries: DashMap<String, Value>,
    available: AtomicBool,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call fails with `Unavailable` while false.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check(&self) -> DatastoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DatastoreError::Unavailable(
                "memory datastore is offline".to_string(),
            ))
        }
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Datastore for MemoryDatastore {
    async fn ping(&self) -> DatastoreResult<()> {
        self.check()
    }

    async fn get(&self, key: &str) -> DatastoreResult<Option<Value>> {
        self.check()?;
        Ok(self.entries.get(key).map(|v| v.value().clone()))
    }

    async fn put(&self, key: &str, value: Value) -> DatastoreResult<()> {
        self.check()?;
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> DatastoreResult<bool> {
        self.check()?;
        Ok(self.entries.remove(key).is_some())
    }
}
