//! Persistent observation state.
//!
//! Tracks the last observed manifest digest per watched reference in a
//! JSON file, written atomically (write `.tmp`, rename). The digest only
//! advances when a non-empty digest differs from the stored one; that
//! change signal is what drives the commit pipeline.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use magos_core::error::{MagosError, Result};
use magos_core::policy::Policy;
use serde::{Deserialize, Serialize};

/// Last-known info for a single watched reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationEntry {
    /// Most recently observed manifest digest; empty until seeded.
    #[serde(default)]
    pub digest: String,

    /// Opaque HTTP validator received with that digest.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,

    /// Policy the entry was observed under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,

    /// Advances on every poll, including 304 Not Modified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,

    /// Advances only when the digest strictly changes to a non-empty value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_changed: Option<DateTime<Utc>>,
}

/// On-disk document shape.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDoc {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    entries: HashMap<String, ObservationEntry>,
}

/// JSON-backed observation store.
///
/// All operations are serialized by one mutex; none of them is held
/// across I/O awaits (the store is fully synchronous).
pub struct ObservationStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, ObservationEntry>>,
}

impl ObservationStore {
    /// Create a store backed by `path`; call `load` to populate it.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Canonical key for a watched reference: lowercased
    /// `registry/owner/name:ref`.
    pub fn key(registry: &str, owner: &str, name: &str, reference: &str) -> String {
        format!(
            "{}/{}/{}:{}",
            registry.to_lowercase(),
            owner.to_lowercase(),
            name.to_lowercase(),
            reference.to_lowercase()
        )
    }

    /// Read state from disk if present; creates the parent directory and
    /// starts empty when the file does not exist yet.
    pub fn load(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.entries.lock().unwrap().clear();
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let doc: StateDoc = serde_json::from_str(&data).map_err(|e| {
            MagosError::SerializationError(format!(
                "corrupt state file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        *self.entries.lock().unwrap() = doc.entries;
        Ok(())
    }

    /// Write state to disk atomically (write `.tmp`, rename).
    pub fn save(&self) -> Result<()> {
        let doc = StateDoc {
            version: 1,
            updated_at: Some(Utc::now()),
            entries: self.entries.lock().unwrap().clone(),
        };
        let data = serde_json::to_string_pretty(&doc)?;
        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Get the entry for a key.
    pub fn get(&self, key: &str) -> Option<ObservationEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Refresh `last_checked` without touching the digest. The provided
    /// policy is adopted only when the entry has none recorded.
    pub fn update_checked(&self, key: &str, policy: Option<Policy>) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_default();
        if entry.policy.is_none() {
            entry.policy = policy;
        }
        entry.last_checked = Some(Utc::now());
    }

    /// Record an observation. Returns true iff the incoming digest is
    /// non-empty and differs from the stored one; `last_changed` advances
    /// only in that case. The etag is written only when non-empty, and a
    /// recorded policy is never overwritten by `None`.
    pub fn upsert_digest(
        &self,
        key: &str,
        digest: &str,
        etag: &str,
        policy: Option<Policy>,
    ) -> bool {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(key.to_string()).or_default();

        let changed = !digest.is_empty() && entry.digest != digest;
        if changed {
            entry.digest = digest.to_string();
            entry.last_changed = Some(now);
        }
        if !etag.is_empty() {
            entry.etag = etag.to_string();
        }
        if policy.is_some() {
            entry.policy = policy;
        }
        entry.last_checked = Some(now);
        changed
    }

    /// Number of tracked entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when no entries are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}
