//! Watch target construction from discovered annotations.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use magos_core::policy::Policy;
use magos_core::reference::ImageRef;

use crate::scan::Annotation;

/// A single watched image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Absolute path of the manifest file that declared the image line.
    pub name: PathBuf,
    /// Parsed image reference.
    pub image: ImageRef,
    /// Update policy.
    pub policy: Policy,
    /// Poll interval override; zero means the watcher default.
    pub interval: Duration,
}

impl Target {
    /// Ref key used for the observation state: the semver policy tracks a
    /// channel rather than a concrete tag, so its stored baseline
    /// survives tag advancement.
    pub fn ref_key(&self) -> String {
        match self.policy {
            Policy::Semver => "semver".to_string(),
            _ => self.image.tag.to_lowercase(),
        }
    }

    /// Observation store key for this target.
    pub fn observation_key(&self) -> String {
        crate::state::ObservationStore::key(
            &self.image.registry,
            &self.image.owner,
            &self.image.name,
            &self.ref_key(),
        )
    }
}

/// Build watch targets from annotations. `manual` annotations produce no
/// target, and unparseable image references are skipped with a warning.
pub fn build_targets(annotations: &[Annotation]) -> Vec<Target> {
    let mut targets = Vec::new();
    for anno in annotations {
        if anno.policy == Policy::Manual {
            continue;
        }
        match ImageRef::parse(&anno.image) {
            Ok(image) => targets.push(Target {
                name: anno.file.clone(),
                image,
                policy: anno.policy,
                interval: Duration::ZERO,
            }),
            Err(e) => {
                tracing::warn!(
                    file = %anno.file.display(),
                    line = anno.line,
                    image = %anno.image,
                    error = %e,
                    "Skipping annotation with malformed image reference"
                );
            }
        }
    }
    targets
}

/// Build one target per distinct manifest directory, preserving the first
/// annotation's image and policy for that directory. Used to fan out the
/// initial reconcile run; `manual` annotations count here, their
/// directories still deserve convergence.
pub fn build_reconcile_paths(annotations: &[Annotation]) -> Vec<Target> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut out = Vec::new();

    for anno in annotations {
        let dir = anno
            .file
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default();
        if !seen.insert(dir) {
            continue;
        }
        match ImageRef::parse(&anno.image) {
            Ok(image) => out.push(Target {
                name: anno.file.clone(),
                image,
                policy: anno.policy,
                interval: Duration::ZERO,
            }),
            Err(e) => {
                tracing::warn!(
                    file = %anno.file.display(),
                    error = %e,
                    "Skipping reconcile path with malformed image reference"
                );
            }
        }
    }
    out
}
