pub mod regen;
pub mod run;
pub mod stages;

use std::path::PathBuf;

use anyhow::Context;
use chainscan_common::config::{self, Config};
use clap::{Args, Parser, Subcommand};

/// Embedded config written on first use and by `regen-config`.
pub const DEFAULT_CONFIG: &str = include_str!("../default/default.yaml");

#[derive(Parser)]
#[command(name = "chainscan")]
#[command(version, about = "Chains recon tools over targets grouped by apex domain.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file (defaults to the per-user config)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run every configured stage against the targets
    #[command(alias = "r")]
    Run(RunArgs),
    /// Overwrite the config file with the built-in default
    #[command(alias = "regen")]
    RegenConfig,
    /// List the configured stages
    #[command(alias = "s")]
    Stages,
}

#[derive(Args, Debug, Default, Clone)]
pub struct RunArgs {
    /// File with newline separated targets, or a single domain
    #[arg(short, long, required_unless_present = "url", conflicts_with = "url")]
    pub targets: Option<String>,

    /// Single URL or host target
    #[arg(short, long)]
    pub url: Option<String>,

    /// Output directory (overrides config)
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Reserved stage slots (overrides config when > 0)
    #[arg(long, default_value_t = 0)]
    pub concurrency: usize,

    /// Per-stage timeout in seconds, 0 disables (overrides config)
    #[arg(long)]
    pub tool_timeout: Option<u64>,

    /// Stream tool output instead of drawing the progress table
    #[arg(short, long)]
    pub verbose: bool,

    /// Stop everything on the first error
    #[arg(long)]
    pub fail_fast: bool,
}

impl RunArgs {
    /// The single target argument handed to the runner.
    pub fn target(&self) -> Option<&str> {
        self.url.as_deref().or(self.targets.as_deref())
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Explicit `--config`, or the per-user default which is created from
    /// [`DEFAULT_CONFIG`] when missing.
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        if let Some(path) = &self.config {
            return Ok(path.clone());
        }
        let path: PathBuf = config::default_config_path()?;
        config::ensure_config_file(&path, DEFAULT_CONFIG, false)
            .with_context(|| format!("creating default config at {}", path.display()))?;
        Ok(path)
    }

    pub fn load_config(&self) -> anyhow::Result<Config> {
        let path: PathBuf = self.config_path()?;
        Ok(Config::load_yaml(&path)?)
    }
}
