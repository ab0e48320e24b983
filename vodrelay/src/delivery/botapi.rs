//! Size-capped upload through the Telegram Bot API.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::Uploader;
use crate::error::{Error, Result};
use crate::telegram::api::BotClient;

/// Hard ceiling the Bot API enforces on uploaded documents.
pub const BOT_API_MAX_BYTES: u64 = 50 * 1024 * 1024;

/// Request/response document upload, suitable only for artifacts below
/// the Bot API ceiling. The size is checked locally before any bytes
/// leave the machine, so an oversized artifact never starts a partial
/// upload.
pub struct BotApiUploader {
    client: Arc<BotClient>,
    ceiling: u64,
}

impl BotApiUploader {
    pub fn new(client: Arc<BotClient>) -> Self {
        Self::with_ceiling(client, BOT_API_MAX_BYTES)
    }

    /// Ceiling override for tests.
    pub fn with_ceiling(client: Arc<BotClient>, ceiling: u64) -> Self {
        Self { client, ceiling }
    }
}

#[async_trait]
impl Uploader for BotApiUploader {
    fn name(&self) -> &'static str {
        "bot-api"
    }

    async fn upload(&self, artifact: &Path, recipient: i64, caption: &str) -> Result<()> {
        let size = tokio::fs::metadata(artifact).await?.len();
        if size > self.ceiling {
            return Err(Error::DeliveryCapability(format!(
                "artifact is {size} bytes but the Bot API backend is capped at {} bytes \
                 and no session backend is available",
                self.ceiling
            )));
        }

        debug!(path = %artifact.display(), size, recipient, "uploading via Bot API");
        self.client
            .send_document(recipient, artifact, caption)
            .await
            .map_err(|e| Error::delivery(format!("Bot API upload failed: {e}")))?;
        info!(path = %artifact.display(), size, recipient, "artifact delivered via Bot API");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversize_artifact_fails_before_any_network_call() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("big.mp4");
        tokio::fs::write(&artifact, b"0123456789").await.unwrap();

        // Unroutable host: any network attempt would error differently
        let client = Arc::new(BotClient::with_base_url("123:abc", "http://127.0.0.1:1"));
        let uploader = BotApiUploader::with_ceiling(client, 4);

        let err = uploader.upload(&artifact, 42, "caption").await.unwrap_err();
        assert!(matches!(err, Error::DeliveryCapability(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn missing_artifact_is_an_io_error() {
        let client = Arc::new(BotClient::with_base_url("123:abc", "http://127.0.0.1:1"));
        let uploader = BotApiUploader::new(client);
        let err = uploader
            .upload(Path::new("/nonexistent/a.mp4"), 42, "caption")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
    }
}
