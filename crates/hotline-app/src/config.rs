//! Module configuration, re-read by every instance in `create_configs`.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChatConfigError {
    #[error("Cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed chat config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid chat config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChatConfig {
    /// Prefix marking a message as a command (`!ping`).
    pub prefix: String,
    /// User ids allowed to run `reload` and `shutdown`.
    pub admins: Vec<String>,
    /// Sent to the reload requester after a successful reload.
    pub reload_ack: String,
    /// Whether `init` fails with `DatastoreSetup` when the datastore is down.
    pub require_datastore: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            admins: Vec::new(),
            reload_ack: "Reload complete".to_string(),
            require_datastore: true,
        }
    }
}

impl ChatConfig {
    pub fn load(path: &Path) -> Result<Self, ChatConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ChatConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ChatConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ChatConfigError> {
        if self.prefix.is_empty() || self.prefix.chars().any(char::is_whitespace) {
            return Err(ChatConfigError::Invalid(format!(
                "prefix {:?} must be non-empty and contain no whitespace",
                self.prefix
            )));
        }
        Ok(())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.iter().any(|admin| admin == user_id)
    }
}
