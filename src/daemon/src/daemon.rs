//! Daemon composition root.
//!
//! Wires the observation store, working clone, scanner, watcher and event
//! consumer together. Startup is fail-fast through the first repo sync
//! and scan; once the watcher is running, nothing is fatal: per-target
//! errors back off, consumer errors are logged and the next event is
//! processed.

use std::sync::Arc;

use magos_core::config::Config;
use magos_core::error::Result;
use magos_core::event::{EventEmitter, UpdateEvent, EVENT_BUFFER};
use magos_core::policy::Policy;
use tokio::sync::{mpsc, watch};

use crate::github::GitHubHost;
use crate::reconcile;
use crate::registry::RegistryClient;
use crate::repo::RepoManager;
use crate::scan;
use crate::state::ObservationStore;
use crate::target::{self, Target};
use crate::watcher::Watcher;

/// Long-running watch/resolve/commit loop.
pub struct Daemon {
    config: Config,
}

impl Daemon {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let cfg = &self.config;
        tracing::info!(repo = %cfg.repo, "Daemon starting");

        if cfg.github.installation_token.is_none() {
            if cfg.github.app_id.is_some() {
                tracing::warn!(
                    "GH_INSTALLATION_TOKEN missing; private repositories will fail \
                     until the token refresher is implemented"
                );
            } else {
                tracing::info!("No git host credentials; running against a public repository");
            }
        }

        // 0. Observation state.
        let store = Arc::new(ObservationStore::new(cfg.state_path()));
        store.load()?;

        // 1. Sync the GitOps repo.
        let host = Arc::new(GitHubHost::new(
            &cfg.repo,
            &cfg.branch,
            cfg.github.installation_token.clone(),
        )?);
        let repo = Arc::new(RepoManager::new(cfg.clone_path(), &cfg.branch, host));
        repo.sync().await?;
        tracing::info!(path = %repo.path().display(), "Repository synced");

        // 2. Discover annotations, 3. build targets.
        let annotations = scan::scan_annotations(repo.path())?;
        let targets = target::build_targets(&annotations);
        tracing::info!(
            annotations = annotations.len(),
            targets = targets.len(),
            "Working tree scanned"
        );

        // 4. Warm state with placeholders so the first poll seeds quietly.
        // Startup is only fail-fast through the scan; a failed warm save
        // costs one extra seed write later, nothing more.
        if let Err(e) = warm_state(&store, &targets) {
            tracing::warn!(error = %e, "State warm-up failed");
        }

        // 5. Initial convergence over every annotated directory.
        let paths = target::build_reconcile_paths(&annotations);
        reconcile::run_all(&cfg.reconcile_script, repo.path(), &paths).await;

        // 6. Event consumer, then the watcher.
        let (emitter, receiver) = EventEmitter::channel(EVENT_BUFFER);
        let consumer = tokio::spawn(consume(
            receiver,
            Arc::clone(&repo),
            self.config.clone(),
            shutdown.clone(),
        ));

        let registry = Arc::new(RegistryClient::ghcr()?);
        let watcher = Watcher::new(targets, registry, store, emitter);
        let result = watcher.start(shutdown).await;

        // The watcher dropped its emitter; the consumer drains and exits.
        let _ = consumer.await;
        result
    }
}

/// Seed an observation entry per target with an empty digest placeholder
/// so the first poll takes the quiet seed branch instead of emitting.
fn warm_state(store: &ObservationStore, targets: &[Target]) -> Result<()> {
    for target in targets {
        store.upsert_digest(&target.observation_key(), "", "", Some(target.policy));
    }
    store.save()?;
    tracing::debug!(entries = store.len(), "Observation state warmed");
    Ok(())
}

/// Single consumer serializing all RepoManager mutations: sync, rewrite,
/// commit, reconcile. Never terminates on an event failure.
async fn consume(
    mut events: mpsc::Receiver<UpdateEvent>,
    repo: Arc<RepoManager>,
    config: Config,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    tracing::debug!("Consumer shutting down");
                    return;
                }
                continue;
            }
            event = events.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        tracing::info!(
            repo = %event.repo,
            reference = %event.reference,
            digest = %event.digest,
            "Processing update event"
        );
        if let Err(e) = handle_event(&event, &repo, &config).await {
            tracing::warn!(
                file = %event.file.display(),
                error = %e,
                "Update event failed"
            );
        }
    }
}

async fn handle_event(event: &UpdateEvent, repo: &RepoManager, config: &Config) -> Result<()> {
    repo.sync().await?;

    // MD_PREFER_DIGEST pins by digest on write regardless of the target's
    // declared policy; the event always carries the digest.
    let write_policy = if config.prefer_digest {
        Policy::Digest
    } else {
        event.policy
    };
    let changed = repo.update_image(&event.file, &event.reference, &event.digest, write_policy)?;
    if !changed {
        tracing::info!(file = %event.file.display(), "No changes");
        return Ok(());
    }
    tracing::info!(file = %event.file.display(), "Manifest updated");

    repo.commit_and_push(&event.file, config.prefer_pr).await?;

    reconcile::run_reconcile(
        &config.reconcile_script,
        repo.path(),
        &event.file,
        event.policy.as_str(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use magos_core::reference::ImageRef;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn target(image: &str, policy: Policy) -> Target {
        Target {
            name: PathBuf::from("/r/app/compose.yml"),
            image: ImageRef::parse(image).unwrap(),
            policy,
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_warm_state_seeds_placeholders() {
        let dir = TempDir::new().unwrap();
        let store = ObservationStore::new(dir.path().join("state.json"));
        store.load().unwrap();

        let targets = vec![
            target("ghcr.io/o/a:0.0.3", Policy::Semver),
            target("ghcr.io/o/b:latest", Policy::Latest),
        ];
        warm_state(&store, &targets).unwrap();

        let a = store.get("ghcr.io/o/a:semver").expect("semver channel entry");
        assert!(a.digest.is_empty());
        assert_eq!(a.policy, Some(Policy::Semver));
        assert!(store.get("ghcr.io/o/b:latest").is_some());
        // Placeholder seeding persists immediately.
        assert!(dir.path().join("state.json").exists());
    }

    #[test]
    fn test_warm_state_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = ObservationStore::new(dir.path().join("state.json"));
        store.load().unwrap();
        let targets = vec![target("ghcr.io/o/a:0.0.3", Policy::Semver)];

        warm_state(&store, &targets).unwrap();
        warm_state(&store, &targets).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_warm_state_keeps_existing_baseline() {
        // A placeholder upsert must not clobber a digest loaded from disk.
        let dir = TempDir::new().unwrap();
        let store = ObservationStore::new(dir.path().join("state.json"));
        store.load().unwrap();
        store.upsert_digest("ghcr.io/o/a:semver", "sha256:aaa", "etag", Some(Policy::Semver));

        warm_state(&store, &[target("ghcr.io/o/a:0.0.3", Policy::Semver)]).unwrap();
        assert_eq!(store.get("ghcr.io/o/a:semver").unwrap().digest, "sha256:aaa");
    }
}
