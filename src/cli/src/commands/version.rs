//! `magos-dominus version` command.

use clap::Args;

#[derive(Args)]
pub struct VersionArgs {}

pub async fn execute(_args: VersionArgs) -> anyhow::Result<()> {
    println!("Magos Dominus {}", magos_core::VERSION);
    Ok(())
}
