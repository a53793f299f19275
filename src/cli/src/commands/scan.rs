//! `magos-dominus scan` command.
//!
//! Offline dry-run of annotation discovery: walks a local working tree
//! and prints what the daemon would watch, without touching the network.

use std::path::PathBuf;

use clap::Args;
use magos_daemon::{scan, target};

#[derive(Args)]
pub struct ScanArgs {
    /// Working tree to scan (defaults to the current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub async fn execute(args: ScanArgs) -> anyhow::Result<()> {
    let root = args.path.canonicalize()?;
    let annotations = scan::scan_annotations(&root)?;
    let targets = target::build_targets(&annotations);

    println!(
        "{} annotation(s), {} watch target(s) under {}",
        annotations.len(),
        targets.len(),
        root.display()
    );
    for anno in &annotations {
        let watched = anno.policy != magos_core::Policy::Manual;
        println!(
            "  {}:{} {} policy={}{}",
            anno.file.display(),
            anno.line,
            anno.image,
            anno.policy,
            if watched { "" } else { " (not watched)" },
        );
    }
    Ok(())
}
