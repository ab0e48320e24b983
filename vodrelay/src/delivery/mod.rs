//! Artifact delivery gateway.
//!
//! Two interchangeable upload strategies live behind [`Uploader`]: the
//! size-capped Bot API upload and the session-based `tdl` upload for
//! arbitrarily large files. The backend is resolved exactly once at
//! pool start and held as a single shared value afterwards.

mod botapi;
mod session;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::pipeline::job::Job;
use crate::telegram::api::BotClient;

pub use botapi::{BOT_API_MAX_BYTES, BotApiUploader};
pub use session::SessionUploader;

/// "Send this file to recipient X with this caption."
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Short backend name for logs and notifications.
    fn name(&self) -> &'static str;

    /// Whether the caption travels with the upload itself. When false
    /// the caller delivers it as a follow-up text message.
    fn carries_caption(&self) -> bool {
        true
    }

    /// Uploads a local file with a caption. Must not leave a partial
    /// upload visible to the recipient on failure.
    async fn upload(&self, artifact: &Path, recipient: i64, caption: &str) -> Result<()>;
}

/// Resolves the delivery backend once at startup.
///
/// Prefers the session backend when credentials are configured and the
/// authorization probe succeeds; otherwise falls back to the capped Bot
/// API backend. A failed probe degrades capability, never availability:
/// oversized artifacts will fail individually later.
pub async fn resolve_uploader(config: &Config, client: Arc<BotClient>) -> Arc<dyn Uploader> {
    if let Some(credentials) = &config.session {
        let session = SessionUploader::new(credentials.clone());
        match session.probe_auth().await {
            Ok(identity) => {
                info!(identity, "session upload backend authorized");
                return Arc::new(session);
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "session upload backend unavailable, falling back to Bot API uploads \
                     (artifacts above {} bytes will fail)",
                    BOT_API_MAX_BYTES
                );
            }
        }
    }
    Arc::new(BotApiUploader::new(client))
}

/// Composes the plain-text caption accompanying an upload.
///
/// Control characters other than newlines are stripped so arbitrary
/// batch or subject text cannot smuggle anything into the transport.
pub fn compose_caption(job: &Job, attribution: &str) -> String {
    let mut caption = format!(
        "Batch: {}\nSubject: {}\n{}",
        job.batch,
        job.subject,
        job.label()
    );
    let attribution = attribution.trim();
    if !attribution.is_empty() {
        caption.push('\n');
        caption.push_str(attribution);
    }
    caption
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("https://cdn.example.com/a.m3u8", "Batch 2026", "Physics", 2, 9, 42)
    }

    #[test]
    fn caption_carries_all_labels() {
        let caption = compose_caption(&job(), "via @vodrelay");
        assert_eq!(
            caption,
            "Batch: Batch 2026\nSubject: Physics\nLecture 2 / 9\nvia @vodrelay"
        );
    }

    #[test]
    fn empty_attribution_is_omitted() {
        let caption = compose_caption(&job(), "   ");
        assert!(caption.ends_with("Lecture 2 / 9"));
    }

    #[test]
    fn control_characters_are_stripped() {
        let mut job = job();
        job.subject = "Phys\x00ics\r\x1b[31m".to_string();
        let caption = compose_caption(&job, "");
        assert!(caption.contains("Subject: Physics[31m"), "caption: {caption:?}");
        assert!(!caption.contains('\x00'));
        assert!(!caption.contains('\r'));
        assert!(!caption.contains('\x1b'));
    }
}
