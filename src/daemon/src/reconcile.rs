//! Reconcile hook execution.
//!
//! The user-supplied hook is the only thing that touches the runtime; the
//! daemon invokes it as `<script> <repoRoot> <file> <writeMode>` with a
//! hard deadline so a wedged hook cannot stall the event consumer.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use magos_core::error::{MagosError, Result};
use tokio::process::Command;

use crate::target::Target;

/// Hard deadline for one hook invocation.
pub const RECONCILE_DEADLINE: Duration = Duration::from_secs(120);

/// Run the reconcile hook once for `file`.
///
/// The script must exist and be executable. Stdout and stderr are
/// captured into one buffer and logged together with the exit status;
/// a non-zero exit is an error for the caller to log, never a panic.
pub async fn run_reconcile(
    script: &Path,
    repo_root: &Path,
    file: &Path,
    write_mode: &str,
) -> Result<()> {
    let meta = std::fs::metadata(script).map_err(|_| {
        MagosError::ConfigError(format!(
            "reconcile script missing or not executable: {}",
            script.display()
        ))
    })?;
    if meta.permissions().mode() & 0o111 == 0 {
        return Err(MagosError::ConfigError(format!(
            "reconcile script missing or not executable: {}",
            script.display()
        )));
    }

    let mut cmd = Command::new(script);
    cmd.arg(repo_root)
        .arg(file)
        .arg(write_mode)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // The deadline drops the future; make sure the child dies with it.
        .kill_on_drop(true);

    let output = match tokio::time::timeout(RECONCILE_DEADLINE, cmd.output()).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(MagosError::DeadlineError(format!(
                "reconcile {} exceeded {}s",
                script.display(),
                RECONCILE_DEADLINE.as_secs()
            )))
        }
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    tracing::info!(
        script = %script.display(),
        file = %file.display(),
        exit = ?output.status.code(),
        output = %combined.trim_end(),
        "Reconcile finished"
    );

    if !output.status.success() {
        return Err(MagosError::Other(format!(
            "reconcile exited with {}",
            output.status
        )));
    }
    Ok(())
}

/// Run the hook once per distinct target directory. Individual failures
/// are logged and never abort the batch.
pub async fn run_all(script: &Path, repo_root: &Path, targets: &[Target]) {
    let mut seen = std::collections::HashSet::new();
    for target in targets {
        let dir = target.name.parent().unwrap_or(repo_root);
        if !seen.insert(dir.to_path_buf()) {
            continue;
        }

        tracing::info!(
            dir = %dir.display(),
            policy = %target.policy,
            "Applying folder"
        );
        if let Err(e) = run_reconcile(script, repo_root, &target.name, target.policy.as_str()).await
        {
            tracing::warn!(dir = %dir.display(), error = %e, "Reconcile failed");
        }
    }
}
