//! Opaque datastore boundary.
//!
//! Durability and caching are the implementation's business; the host only
//! needs a handle it can share across module instances.

use thiserror::Error;

pub type DatastoreResult<T> = Result<T, DatastoreError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DatastoreError {
    #[error("Datastore unavailable: {0}")]
    Unavailable(String),

    #[error("Datastore serialization error: {source}")]
    Serialization {
        #[from]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Other(String),
}

#[async_trait::async_trait]
pub trait Datastore: Send + Sync {
    /// Cheap liveness check used while preparing a module.
    async fn ping(&self) -> DatastoreResult<()>;

    async fn get(&self, key: &str) -> DatastoreResult<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: serde_json::Value) -> DatastoreResult<()>;

    /// Returns whether the key existed.
    async fn delete(&self, key: &str) -> DatastoreResult<bool>;
}
