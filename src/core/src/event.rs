use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::policy::Policy;

/// Default event channel capacity.
pub const EVENT_BUFFER: usize = 128;

/// Emitted when a watched reference resolved to a new digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Manifest file that declared the watched image line.
    pub file: PathBuf,

    /// Repository as `owner/name`.
    pub repo: String,

    /// Resolved reference (tag) the digest was observed under.
    pub reference: String,

    /// Newly observed manifest digest (`sha256:...`).
    pub digest: String,

    /// Policy of the originating target.
    pub policy: Policy,

    /// When the change was discovered.
    pub discovered_at: DateTime<Utc>,
}

/// Update event emitter.
///
/// `emit` never blocks: when the consumer falls behind and the buffer is
/// full, the event is dropped and logged. The watcher re-detects the same
/// digest on its next tick, so delivery is at-most-once per tick with
/// polling as the recovery mechanism.
#[derive(Clone)]
pub struct EventEmitter {
    sender: mpsc::Sender<UpdateEvent>,
}

impl EventEmitter {
    /// Create a bounded event channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<UpdateEvent>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Emit an event without blocking. Returns false when the event was
    /// dropped (buffer full or consumer gone), so the caller can leave
    /// its baseline untouched and re-detect on the next tick.
    pub fn emit(&self, event: UpdateEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(ev)) => {
                tracing::warn!(
                    repo = %ev.repo,
                    digest = %ev.digest,
                    "Event buffer full, dropping update event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Event channel closed, dropping update event");
                false
            }
        }
    }
}
