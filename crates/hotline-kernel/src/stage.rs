use serde::{Deserialize, Serialize};
use std::fmt;

/// Boot lifecycle stages, in the only order they may run.
///
/// A first boot walks all five. A reload re-runs `Config`, `PreInit` and
/// `Init` against the incoming module and starts its `PostInit` only once
/// its listeners have been promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStage {
    Args,
    Config,
    PreInit,
    Init,
    PostInit,
}

impl BootStage {
    pub const ALL: [BootStage; 5] = [
        BootStage::Args,
        BootStage::Config,
        BootStage::PreInit,
        BootStage::Init,
        BootStage::PostInit,
    ];

    /// Stages re-run against a new module during a reload, before promotion.
    pub const RELOAD: [BootStage; 3] = [BootStage::Config, BootStage::PreInit, BootStage::Init];

    /// The stage that follows this one, if any.
    pub fn next(self) -> Option<BootStage> {
        match self {
            Self::Args => Some(Self::Config),
            Self::Config => Some(Self::PreInit),
            Self::PreInit => Some(Self::Init),
            Self::Init => Some(Self::PostInit),
            Self::PostInit => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Args => "args",
            Self::Config => "config",
            Self::PreInit => "pre_init",
            Self::Init => "init",
            Self::PostInit => "post_init",
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
