//! Job descriptors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One request to turn a single source stream into one delivered
/// artifact. Immutable once enqueued; consumed exactly once by a
/// worker; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    /// HTTP(S) locator of the streaming manifest.
    pub source_url: String,
    pub batch: String,
    pub subject: String,
    /// 1-based position of this lecture within the batch.
    pub seq: u32,
    /// Number of lectures in the batch.
    pub total: u32,
    /// Chat that submitted the job and receives all notifications.
    pub requester_chat: i64,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(
        source_url: impl Into<String>,
        batch: impl Into<String>,
        subject: impl Into<String>,
        seq: u32,
        total: u32,
        requester_chat: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_url: source_url.into(),
            batch: batch.into(),
            subject: subject.into(),
            seq,
            total,
            requester_chat,
            enqueued_at: Utc::now(),
        }
    }

    /// Short human-readable label used in notifications and logs.
    pub fn label(&self) -> String {
        format!("Lecture {} / {}", self.seq, self.total)
    }
}
