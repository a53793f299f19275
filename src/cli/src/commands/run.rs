//! `magos-dominus run` command.

use clap::Args;
use magos_core::config::Config;
use magos_daemon::Daemon;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

#[derive(Args)]
pub struct RunArgs {
    /// Log intended actions without pushing or applying
    #[arg(long)]
    pub dry_run: bool,
}

pub async fn execute(args: RunArgs) -> anyhow::Result<()> {
    if args.dry_run {
        // The hook contract carries the write mode; dry-run is a hook
        // concern until the daemon grows a first-class mode for it.
        std::env::set_var("MD_DRY_RUN", "true");
    }

    let config = Config::from_env()?;

    // Cancellation on SIGINT/SIGTERM.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    Daemon::new(config).run(shutdown_rx).await?;
    Ok(())
}
