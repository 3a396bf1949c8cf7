use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use chainscan_common::config::Config;

use crate::commands::RunArgs;

/// Base directory for results: `--out` if given, else the directory of an
/// existing targets file, else the working directory.
pub fn resolve_output_base(out: Option<&Path>, targets: Option<&str>) -> io::Result<PathBuf> {
    if let Some(out) = out {
        return std::path::absolute(out);
    }
    if let Some(targets) = targets
        && Path::new(targets).is_file()
    {
        let abs: PathBuf = std::path::absolute(targets)?;
        if let Some(parent) = abs.parent() {
            return Ok(parent.to_path_buf());
        }
    }
    std::env::current_dir()
}

/// Only touches `output_dir` when `--out` was given.
pub fn apply_output_override(
    cfg: &mut Config,
    out: Option<&Path>,
    targets: Option<&str>,
) -> io::Result<()> {
    if out.is_none() {
        return Ok(());
    }
    cfg.output_dir = resolve_output_base(out, targets)?;
    Ok(())
}

/// Folds command line flags into the loaded config.
pub fn apply_run_overrides(cfg: &mut Config, args: &RunArgs, debug: bool) -> io::Result<()> {
    apply_output_override(cfg, args.out.as_deref(), args.targets.as_deref())?;

    if args.concurrency > 0 {
        cfg.concurrency = args.concurrency;
    }
    if cfg.concurrency == 0 {
        cfg.concurrency = default_concurrency();
    }
    if let Some(timeout) = args.tool_timeout {
        cfg.tool_timeout_sec = timeout;
    }
    cfg.debug |= debug;
    cfg.verbose |= args.verbose;
    cfg.fail_fast |= args.fail_fast;
    Ok(())
}

fn default_concurrency() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get()) * 2
}
