//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand};
use hotline_runtime::LaunchArgs;
use std::path::PathBuf;

/// Hotline - chat service host with hot-reloadable application modules
#[derive(Parser)]
#[command(name = "hotline")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true, args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Options for the default `run` command
    #[command(flatten)]
    pub launch: LaunchOpts,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Boot the host and serve until shutdown (default)
    Run(LaunchOpts),

    /// Resolve and validate settings and the module config, then exit
    CheckConfig(LaunchOpts),
}

#[derive(Args, Clone, Debug, Default)]
pub struct LaunchOpts {
    /// Host settings file (yaml, toml or json)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Module configuration file handed to the module
    #[arg(long)]
    pub module_config: Option<PathBuf>,

    /// Directory holding module artifacts
    #[arg(long)]
    pub module_dir: Option<PathBuf>,

    /// Load this module version instead of the newest
    #[arg(long)]
    pub module_version: Option<String>,

    /// Gateway shard count
    #[arg(long)]
    pub shards: Option<u32>,

    /// Run the statically linked chat module instead of an artifact
    #[arg(long)]
    pub builtin: bool,
}

impl LaunchOpts {
    pub fn launch_args(&self) -> LaunchArgs {
        LaunchArgs {
            config: self.config.clone(),
            module_config: self.module_config.clone(),
            module_dir: self.module_dir.clone(),
            module_version: self.module_version.clone(),
            shards: self.shards,
        }
    }
}
