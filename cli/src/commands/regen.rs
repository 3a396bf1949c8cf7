use std::path::PathBuf;

use anyhow::Context;
use chainscan_common::config;

use crate::commands::{CommandLine, DEFAULT_CONFIG};
use crate::terminal::print;

/// Rewrites the config file from the embedded default and prints its path.
pub fn regen(cli: &CommandLine) -> anyhow::Result<()> {
    let path: PathBuf = match &cli.config {
        Some(path) => path.clone(),
        None => config::default_config_path().context("failed to resolve default config path")?,
    };

    config::ensure_config_file(&path, DEFAULT_CONFIG, true)
        .with_context(|| format!("failed to write default config to {}", path.display()))?;

    print::print(&path.display().to_string());
    Ok(())
}
