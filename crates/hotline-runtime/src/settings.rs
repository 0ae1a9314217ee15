//! Host settings
//!
//! Loaded once, during the `Args` stage, from a YAML/TOML/JSON file with
//! `HOTLINE__SECTION__KEY` environment overrides on top, then adjusted by
//! command-line flags and validated. Every module instance sees the same
//! settings; a reload never re-reads them (the module re-reads its own
//! configuration file in `create_configs`).

use hotline_kernel::config::{ConfigError, load_layered};
use hotline_kernel::{Credential, HttpLimits};
use hotline_modules::ModuleVersion;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Prefix of environment overrides (`HOTLINE__GATEWAY__SHARDS=4`).
pub const ENV_PREFIX: &str = "HOTLINE";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Load(#[from] ConfigError),

    #[error("Invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl SettingsError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Which gateway implementation the host connects through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    /// Lines on stdin become messages; replies go to stdout.
    #[default]
    Console,
    /// In-process gateway driven by the embedder.
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub kind: GatewayKind,
    pub shards: u32,
    pub token: Credential,
    /// User id the service acts as.
    pub self_user_id: String,
    /// Author id given to console input.
    pub console_user: String,
    pub console_channel: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            kind: GatewayKind::Console,
            shards: 1,
            token: Credential::default(),
            self_user_id: "hotline".to_string(),
            console_user: "operator".to_string(),
            console_channel: "console".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModuleSettings {
    /// Artifact base name (`libchat-1.2.0.so` has name `chat`).
    pub name: String,
    pub directory: PathBuf,
    /// Load exactly this version instead of the newest.
    pub version: Option<String>,
    /// Module configuration file handed to `create_configs`.
    pub config: PathBuf,
    /// Where shadow copies of artifacts are written.
    pub shadow_dir: Option<PathBuf>,
}

impl Default for ModuleSettings {
    fn default() -> Self {
        Self {
            name: "chat".to_string(),
            directory: PathBuf::from("modules"),
            version: None,
            config: PathBuf::from("chat.yaml"),
            shadow_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReloadSettings {
    /// Upper bound on the pre-promotion part of a reload. `0` waits forever.
    pub timeout_secs: u64,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        Self { timeout_secs: 120 }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub gateway: GatewaySettings,
    pub http: HttpLimits,
    pub module: ModuleSettings,
    pub reload: ReloadSettings,
}

impl HostSettings {
    /// Load from `path` with environment overrides.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        Ok(load_layered(&path, Some(ENV_PREFIX))?)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.gateway.shards == 0 {
            return Err(SettingsError::invalid(
                "gateway.shards",
                "must be a positive integer",
            ));
        }
        if self.http.max_concurrent_requests == 0 {
            return Err(SettingsError::invalid(
                "http.max_concurrent_requests",
                "must be a positive integer",
            ));
        }
        if self.module.name.trim().is_empty() {
            return Err(SettingsError::invalid("module.name", "must not be empty"));
        }
        self.pinned_version()?;
        Ok(())
    }

    pub fn shards(&self) -> Result<NonZeroU32, SettingsError> {
        NonZeroU32::new(self.gateway.shards)
            .ok_or_else(|| SettingsError::invalid("gateway.shards", "must be a positive integer"))
    }

    pub fn pinned_version(&self) -> Result<Option<ModuleVersion>, SettingsError> {
        self.module
            .version
            .as_deref()
            .map(|v| {
                ModuleVersion::parse(v).map_err(|e| SettingsError::invalid("module.version", e.to_string()))
            })
            .transpose()
    }

    /// `None` when reloads may take as long as they need.
    pub fn reload_timeout(&self) -> Option<Duration> {
        match self.reload.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Launch arguments: where the settings come from plus flag overrides.
#[derive(Debug, Clone, Default)]
pub struct LaunchArgs {
    pub config: Option<PathBuf>,
    pub module_config: Option<PathBuf>,
    pub module_dir: Option<PathBuf>,
    pub module_version: Option<String>,
    pub shards: Option<u32>,
}

impl LaunchArgs {
    /// Resolve and validate the host settings.
    pub fn resolve(&self) -> Result<HostSettings, SettingsError> {
        let mut settings = match &self.config {
            Some(path) => HostSettings::load(path)?,
            None => HostSettings::default(),
        };

        if let Some(path) = &self.module_config {
            settings.module.config = path.clone();
        }
        if let Some(dir) = &self.module_dir {
            settings.module.directory = dir.clone();
        }
        if let Some(version) = &self.module_version {
            settings.module.version = Some(version.clone());
        }
        if let Some(shards) = self.shards {
            settings.gateway.shards = shards;
        }

        settings.validate()?;
        Ok(settings)
    }
}
