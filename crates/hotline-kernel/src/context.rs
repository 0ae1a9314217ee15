//! Values handed to module stage hooks.
//!
//! [`BootContext`] is built once, at the start of the first `PreInit` stage,
//! and every module instance for the rest of the process sees the same
//! value. [`InitContext`] carries the host-owned collaborators that outlive
//! any single module.

use crate::datastore::Datastore;
use crate::gateway::Gateway;
use crate::listener::ListenerRegistry;
use crate::module::ReloadOrigin;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Semaphore, SemaphorePermit};

/// Connection credential. Never printed: `Debug` and `Display` redact it.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret, for the code that actually authenticates.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Limits of the shared outbound HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpLimits {
    /// Requests allowed in flight at once across all modules.
    pub max_concurrent_requests: usize,
    /// Idle connections kept per host.
    pub pool_max_idle_per_host: usize,
    pub request_timeout_secs: u64,
}

impl Default for HttpLimits {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 16,
            pool_max_idle_per_host: 4,
            request_timeout_secs: 30,
        }
    }
}

/// Shared HTTP client plus the permit pool that bounds its concurrency.
///
/// Cloning is cheap; all clones share one connection pool and one
/// semaphore.
#[derive(Clone)]
pub struct SharedHttp {
    client: reqwest::Client,
    permits: Arc<Semaphore>,
    limits: HttpLimits,
}

impl SharedHttp {
    pub fn new(limits: HttpLimits) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(limits.pool_max_idle_per_host)
            .timeout(Duration::from_secs(limits.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            permits: Arc::new(Semaphore::new(limits.max_concurrent_requests.max(1))),
            limits,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn limits(&self) -> HttpLimits {
        self.limits
    }

    /// Wait for a request slot. Hold the permit for the lifetime of the
    /// request.
    pub async fn permit(&self) -> Result<SemaphorePermit<'_>, AcquireError> {
        self.permits.acquire().await
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl fmt::Debug for SharedHttp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHttp")
            .field("limits", &self.limits)
            .field("available_permits", &self.permits.available_permits())
            .finish()
    }
}

/// Immutable process-wide boot values.
#[derive(Debug, Clone)]
pub struct BootContext {
    started_at: DateTime<Utc>,
    shards: NonZeroU32,
    credential: Credential,
    http: SharedHttp,
}

impl BootContext {
    pub fn new(shards: NonZeroU32, credential: Credential, http: SharedHttp) -> Self {
        Self {
            started_at: Utc::now(),
            shards,
            credential,
            http,
        }
    }

    /// Override the recorded start time (the host passes its own birth time).
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn uptime(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    pub fn shards(&self) -> NonZeroU32 {
        self.shards
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn http(&self) -> &SharedHttp {
        &self.http
    }
}

/// Host-owned collaborators handed to a module's `init` hook.
#[derive(Clone)]
pub struct InitContext {
    pub gateway: Arc<dyn Gateway>,
    pub datastore: Arc<dyn Datastore>,
    /// Registration target chosen by the host (staging during a reload).
    pub listeners: Arc<dyn ListenerRegistry>,
}

impl fmt::Debug for InitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitContext")
            .field("session", self.gateway.session())
            .finish_non_exhaustive()
    }
}

/// Handed to `post_init` once the module owns the active listener set.
#[derive(Debug, Clone, Default)]
pub struct PostInitContext {
    /// Present when this module came live through a reload.
    pub reload_origin: Option<ReloadOrigin>,
    /// Version of the module this one replaced.
    pub previous_version: Option<String>,
}
