//! Per-target polling workers.
//!
//! One cooperative worker per target, each driven by its own timer with
//! jitter so a fleet of targets does not stampede the registry. Failed
//! polls back off exponentially (capped at two minutes); successful polls
//! return to the base cadence.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use magos_core::config::DEFAULT_POLL_INTERVAL_SECS;
use magos_core::error::{MagosError, Result};
use magos_core::event::{EventEmitter, UpdateEvent};
use rand::Rng;
use tokio::sync::watch;

use crate::registry::RegistryClient;
use crate::state::ObservationStore;
use crate::target::Target;

/// Ceiling for the failure backoff.
const MAX_BACKOFF: Duration = Duration::from_secs(120);

/// Starting point for the failure backoff.
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Orchestrates one polling worker per target.
pub struct Watcher {
    targets: Vec<Target>,
    registry: Arc<RegistryClient>,
    store: Arc<ObservationStore>,
    emitter: EventEmitter,
}

impl Watcher {
    pub fn new(
        targets: Vec<Target>,
        registry: Arc<RegistryClient>,
        store: Arc<ObservationStore>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            targets,
            registry,
            store,
            emitter,
        }
    }

    /// Spawn all workers and wait for them to drain after shutdown fires.
    pub async fn start(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.targets.is_empty() {
            tracing::info!("No targets configured; watcher idle");
        }

        let mut handles = Vec::with_capacity(self.targets.len());
        for target in self.targets {
            let registry = Arc::clone(&self.registry);
            let store = Arc::clone(&self.store);
            let emitter = self.emitter.clone();
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                run_worker(target, registry, store, emitter, shutdown).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }
        tracing::info!("Watcher stopped");
        Ok(())
    }
}

/// Single-target poll loop: initial jitter, then tick / cool down until
/// the shutdown signal fires.
async fn run_worker(
    target: Target,
    registry: Arc<RegistryClient>,
    store: Arc<ObservationStore>,
    emitter: EventEmitter,
    mut shutdown: watch::Receiver<bool>,
) {
    let base = if target.interval > Duration::ZERO {
        target.interval
    } else {
        Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
    };

    tracing::debug!(
        file = %target.name.display(),
        image = %target.image,
        policy = %target.policy,
        interval_secs = base.as_secs(),
        "Worker started"
    );

    // Spread initial polls across the fleet.
    if sleep_or_shutdown(jitter(base / 3), &mut shutdown).await {
        return;
    }

    let mut backoff = INITIAL_BACKOFF;
    loop {
        let delay = match tick_once(&target, &registry, &store, &emitter).await {
            Ok(()) => {
                backoff = INITIAL_BACKOFF;
                base + jitter(base / 5)
            }
            // User-data problems: nothing a faster or slower retry fixes,
            // stay on the normal cadence.
            Err(e @ (MagosError::ResolveError(_) | MagosError::NotFoundError(_))) => {
                tracing::warn!(
                    image = %target.image,
                    error = %e,
                    "Skipping target this tick"
                );
                backoff = INITIAL_BACKOFF;
                base + jitter(base / 5)
            }
            Err(e) => {
                backoff = (backoff * 2).min(MAX_BACKOFF);
                tracing::warn!(
                    image = %target.image,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "Poll failed, backing off"
                );
                backoff + jitter(backoff / 3)
            }
        };

        if sleep_or_shutdown(delay, &mut shutdown).await {
            tracing::debug!(file = %target.name.display(), "Worker shutting down");
            return;
        }
    }
}

/// One poll of a target. Ok means "state is consistent, continue on the
/// normal cadence"; Err triggers the caller's backoff handling.
async fn tick_once(
    target: &Target,
    registry: &RegistryClient,
    store: &ObservationStore,
    emitter: &EventEmitter,
) -> Result<()> {
    let key = target.observation_key();
    let etag_in = store
        .get(&key)
        .map(|e| e.etag)
        .unwrap_or_default();

    let head = registry
        .head_digest(&target.image.repo(), &target.image.tag, &etag_in, target.policy)
        .await?;

    apply_head(target, &head, store, emitter)
}

/// Fold a HEAD outcome into the observation state, emitting an update
/// event on a real digest change.
fn apply_head(
    target: &Target,
    head: &crate::registry::HeadResult,
    store: &ObservationStore,
    emitter: &EventEmitter,
) -> Result<()> {
    let repo = target.image.repo();
    let key = target.observation_key();
    let prior = store.get(&key);

    if head.not_modified {
        store.update_checked(&key, Some(target.policy));
        return Ok(());
    }

    // Unseeded (absent or warm placeholder): record the baseline quietly.
    let prior = match prior {
        Some(p) if !p.digest.is_empty() => p,
        _ => {
            store.upsert_digest(&key, &head.digest, &head.etag, Some(target.policy));
            store.save()?;
            tracing::info!(
                repo = %repo,
                reference = %head.resolved_ref,
                digest = %head.digest,
                "Seeded baseline"
            );
            return Ok(());
        }
    };

    if prior.digest == head.digest {
        // Same digest: refresh etag and lastChecked.
        store.upsert_digest(&key, &head.digest, &head.etag, Some(target.policy));
        return Ok(());
    }

    // Real change. The baseline only advances when the event actually
    // made it onto the channel; a dropped event leaves the old digest in
    // place so the next tick re-detects and re-emits.
    tracing::info!(
        repo = %repo,
        reference = %head.resolved_ref,
        digest = %head.digest,
        "Update detected"
    );
    let delivered = emitter.emit(UpdateEvent {
        file: target.name.clone(),
        repo,
        reference: head.resolved_ref.clone(),
        digest: head.digest.clone(),
        policy: target.policy,
        discovered_at: Utc::now(),
    });
    if delivered {
        store.upsert_digest(&key, &head.digest, &head.etag, Some(target.policy));
    } else {
        store.update_checked(&key, Some(target.policy));
    }
    Ok(())
}

/// Uniform random duration in `[0, max)`; zero when `max` is zero.
fn jitter(max: Duration) -> Duration {
    let millis = max.as_millis() as u64;
    if millis == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..millis))
}

/// Sleep for `delay`, returning true when shutdown fired instead.
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        result = shutdown.changed() => result.is_err() || *shutdown.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HeadResult;
    use magos_core::policy::Policy;
    use magos_core::reference::ImageRef;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn target(policy: Policy) -> Target {
        Target {
            name: PathBuf::from("/r/app/compose.yml"),
            image: ImageRef::parse("ghcr.io/o/app:0.0.3").unwrap(),
            policy,
            interval: Duration::ZERO,
        }
    }

    fn head(digest: &str, resolved_ref: &str, etag: &str) -> HeadResult {
        HeadResult {
            digest: digest.to_string(),
            resolved_ref: resolved_ref.to_string(),
            etag: etag.to_string(),
            not_modified: false,
        }
    }

    fn fresh_store(dir: &TempDir) -> Arc<ObservationStore> {
        let store = Arc::new(ObservationStore::new(dir.path().join("state.json")));
        store.load().unwrap();
        store
    }

    #[test]
    fn test_apply_head_seeds_baseline_without_event() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let (emitter, mut rx) = EventEmitter::channel(8);
        let t = target(Policy::Semver);

        apply_head(&t, &head("sha256:aaa", "0.0.4", "etag-1"), &store, &emitter).unwrap();

        let entry = store.get(&t.observation_key()).unwrap();
        assert_eq!(entry.digest, "sha256:aaa");
        assert_eq!(entry.etag, "etag-1");
        assert!(rx.try_recv().is_err());
        // The seed write is persisted.
        assert!(dir.path().join("state.json").exists());
    }

    #[test]
    fn test_apply_head_warm_placeholder_seeds_quietly() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let (emitter, mut rx) = EventEmitter::channel(8);
        let t = target(Policy::Semver);
        // Warm placeholder from startup: entry exists, digest empty.
        store.upsert_digest(&t.observation_key(), "", "", Some(Policy::Semver));

        apply_head(&t, &head("sha256:aaa", "0.0.4", ""), &store, &emitter).unwrap();

        assert_eq!(store.get(&t.observation_key()).unwrap().digest, "sha256:aaa");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_head_not_modified_refreshes_last_checked_only() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let (emitter, mut rx) = EventEmitter::channel(8);
        let t = target(Policy::Latest);
        let key = t.observation_key();
        store.upsert_digest(&key, "sha256:aaa", "etag-1", Some(Policy::Latest));
        let before = store.get(&key).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let nm = HeadResult {
            digest: String::new(),
            resolved_ref: "latest".to_string(),
            etag: "etag-1".to_string(),
            not_modified: true,
        };
        apply_head(&t, &nm, &store, &emitter).unwrap();

        let after = store.get(&key).unwrap();
        assert_eq!(after.digest, "sha256:aaa");
        assert!(after.last_checked > before.last_checked);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_head_change_emits_event_with_resolved_ref() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let (emitter, mut rx) = EventEmitter::channel(8);
        let t = target(Policy::Semver);
        let key = t.observation_key();
        store.upsert_digest(&key, "sha256:aaa", "etag-1", Some(Policy::Semver));

        apply_head(&t, &head("sha256:bbb", "0.0.4", "etag-2"), &store, &emitter).unwrap();

        let ev = rx.try_recv().expect("update event");
        assert_eq!(ev.reference, "0.0.4");
        assert_eq!(ev.digest, "sha256:bbb");
        assert_eq!(ev.repo, "o/app");
        assert_eq!(ev.file, t.name);
        assert_eq!(store.get(&key).unwrap().digest, "sha256:bbb");
    }

    #[test]
    fn test_apply_head_same_digest_refreshes_without_event() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        let (emitter, mut rx) = EventEmitter::channel(8);
        let t = target(Policy::Latest);
        let key = t.observation_key();
        store.upsert_digest(&key, "sha256:aaa", "etag-1", Some(Policy::Latest));

        apply_head(&t, &head("sha256:aaa", "latest", "etag-2"), &store, &emitter).unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(store.get(&key).unwrap().etag, "etag-2");
    }

    #[test]
    fn test_apply_head_dropped_event_keeps_baseline_for_redetect() {
        let dir = TempDir::new().unwrap();
        let store = fresh_store(&dir);
        // Zero-capacity channels are not allowed; fill a 1-slot buffer.
        let (emitter, mut rx) = EventEmitter::channel(1);
        let t = target(Policy::Semver);
        let key = t.observation_key();
        store.upsert_digest(&key, "sha256:aaa", "etag-1", Some(Policy::Semver));

        apply_head(&t, &head("sha256:bbb", "0.0.4", "etag-2"), &store, &emitter).unwrap();
        // Second change while the consumer is stuck: the emit drops.
        apply_head(&t, &head("sha256:ccc", "0.0.5", "etag-3"), &store, &emitter).unwrap();

        // Baseline still holds the delivered digest, so the next tick
        // re-detects sha256:ccc as a change.
        assert_eq!(store.get(&key).unwrap().digest, "sha256:bbb");
        assert_eq!(rx.try_recv().unwrap().digest, "sha256:bbb");
        apply_head(&t, &head("sha256:ccc", "0.0.5", "etag-3"), &store, &emitter).unwrap();
        assert_eq!(rx.try_recv().unwrap().digest, "sha256:ccc");
        assert_eq!(store.get(&key).unwrap().digest, "sha256:ccc");
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..100 {
            let j = jitter(Duration::from_secs(10));
            assert!(j < Duration::from_secs(10));
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut backoff = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..10 {
            backoff = (backoff * 2).min(MAX_BACKOFF);
            seen.push(backoff);
        }
        assert_eq!(seen[0], Duration::from_secs(2));
        assert_eq!(seen[6], Duration::from_secs(120));
        assert_eq!(*seen.last().unwrap(), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_observes_prior_signal() {
        let (tx, rx) = watch::channel(true);
        let mut rx = rx;
        assert!(sleep_or_shutdown(Duration::from_secs(60), &mut rx).await);
        drop(tx);
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown_wakes_on_signal() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(60), &mut rx).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        assert!(sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_tick_failure_leaves_state_untouched() {
        // Registry endpoint that cannot be reached: the tick must fail
        // without creating an observation entry.
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ObservationStore::new(dir.path().join("state.json")));
        store.load().unwrap();
        let registry = Arc::new(RegistryClient::new("http://127.0.0.1:1").unwrap());
        let (emitter, mut rx) = EventEmitter::channel(8);

        let t = target(Policy::Latest);
        let err = tick_once(&t, &registry, &store, &emitter).await.unwrap_err();
        assert!(matches!(err, MagosError::HttpError(_)));
        assert!(store.get(&t.observation_key()).is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_worker_base_interval_default() {
        let t = target(Policy::Semver);
        let base = if t.interval > Duration::ZERO {
            t.interval
        } else {
            Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS)
        };
        assert_eq!(base, Duration::from_secs(30));
    }
}
