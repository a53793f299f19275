//! CLI command definitions and dispatch.

mod run;
mod scan;
mod version;

use clap::{Parser, Subcommand};

/// Magos Dominus, a tiny GitOps agent for homelabs.
///
/// Watches registries, evaluates image policies, updates your GitOps
/// repo and (optionally) applies changes.
#[derive(Parser)]
#[command(name = "magos-dominus", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (watch + reconcile loop)
    Run(run::RunArgs),
    /// Scan a working tree and list discovered watch targets
    Scan(scan::ScanArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Dispatch a parsed command.
pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args).await,
        Command::Scan(args) => scan::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}
