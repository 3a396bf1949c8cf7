use std::path::PathBuf;

use anyhow::Context;
use chainscan_common::success;
use chainscan_core::Runner;
use chainscan_core::stage::StageRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::commands::{CommandLine, RunArgs};
use crate::overrides;
use crate::terminal::{logging, print};

pub async fn run(cli: &CommandLine, args: &RunArgs) -> anyhow::Result<()> {
    let mut cfg = cli.load_config()?;
    overrides::apply_run_overrides(&mut cfg, args, cli.debug)
        .context("failed to resolve output directory")?;
    logging::init_logging(cfg.debug);
    cfg.validate().context("invalid config")?;

    let target: &str = args
        .target()
        .context("exactly one of --targets or --url is required")?;

    if cfg.verbose {
        print::banner();
    }

    let registry: StageRegistry = StageRegistry::from_config(&cfg);
    let output_dir: PathBuf = cfg.output_dir.clone();
    let verbose: bool = cfg.verbose;
    debug!(stages = registry.len(), output = %output_dir.display(), "config ready");

    let cancel = CancellationToken::new();
    spawn_signal_listener(cancel.clone());

    let runner = Runner::new(cfg, registry);
    runner.run(cancel, target).await.context("run failed")?;

    if verbose {
        success!("Done: {}", output_dir.display());
    }
    Ok(())
}

/// Cancels `token` on Ctrl-C or SIGTERM.
fn spawn_signal_listener(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("interrupt received, stopping");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
