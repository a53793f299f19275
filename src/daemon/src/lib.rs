//! Magos Daemon - Watch/Resolve/Commit Control Loop
//!
//! This crate implements the core of the magos-dominus GitOps agent: the
//! registry client, semver resolution, persistent observation state, the
//! annotation scanner, per-target polling, manifest rewrites and the
//! reconcile pipeline.

pub mod daemon;
pub mod github;
pub mod reconcile;
pub mod registry;
pub mod repo;
pub mod scan;
pub mod semver;
pub mod state;
pub mod target;
pub mod watcher;

// Re-export commonly used types
pub use daemon::Daemon;
pub use github::{GitHost, GitHubHost};
pub use registry::RegistryClient;
pub use repo::RepoManager;
pub use scan::Annotation;
pub use state::{ObservationEntry, ObservationStore};
pub use target::Target;
pub use watcher::Watcher;
