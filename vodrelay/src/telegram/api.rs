//! Telegram Bot API client.
//!
//! Thin typed wrapper over the HTTP API (`POST /bot<token>/<method>`).
//! Handles 429 rate limits by respecting the `parameters.retry_after`
//! field returned in the JSON response body.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::{Body, Client, multipart};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Telegram `sendMessage` text limit (UTF-8 characters).
const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Telegram caption limit for media messages.
const TELEGRAM_CAPTION_LIMIT: usize = 1024;

/// Upload timeout. Large media must not be cut short by the default
/// request timeout.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(1000);

fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

/// Standard Bot API response envelope.
#[derive(Debug, Default, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Telegram Bot API client.
pub struct BotClient {
    client: Client,
    base_url: String,
    token: String,
}

impl BotClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, "https://api.telegram.org")
    }

    /// Points the client at an alternate API host.
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        install_rustls_provider();
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    /// Send a JSON API call with rate limit handling.
    async fn call(&self, method: &str, payload: &Value, timeout: Option<Duration>) -> Result<Value> {
        let url = self.method_url(method);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let mut request = self.client.post(&url).json(payload);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }
            let response = request.send().await?;
            let status = response.status();

            if status.as_u16() == 429 {
                let body: ApiResponse = response.json().await.unwrap_or_default();
                let retry_after = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Telegram rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::Other(format!(
                        "Telegram rate limit exceeded after {MAX_RATE_LIMIT_RETRIES} retries"
                    )));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            let body: ApiResponse = response.json().await?;
            return interpret(method, status, body);
        }
    }

    /// Verifies the bot token and returns the bot identity.
    pub async fn get_me(&self) -> Result<User> {
        let result = self.call("getMe", &json!({}), None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Long-polls for new updates past `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let payload = json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        // The request must outlive the server-side poll window
        let timeout = Duration::from_secs(timeout_secs + 10);
        let result = self.call("getUpdates", &payload, Some(timeout)).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        let payload = json!({
            "chat_id": chat_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        let result = self.call("sendMessage", &payload, None).await?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn edit_message_text(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let payload = json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": truncate_message(text, TELEGRAM_MESSAGE_LIMIT),
        });
        match self.call("editMessageText", &payload, None).await {
            Ok(_) => Ok(()),
            // Telegram rejects edits that leave the text unchanged
            Err(Error::Other(msg)) if msg.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Uploads a local file as a document with a caption.
    ///
    /// Rate limits are retried like [`Self::call`]; the multipart form
    /// streams the file, so every attempt reopens it from the start.
    pub async fn send_document(&self, chat_id: i64, document: &Path, caption: &str) -> Result<()> {
        let file_name = document
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document")
            .to_string();
        let mut attempts = 0;

        loop {
            attempts += 1;

            let file = tokio::fs::File::open(document).await?;
            let part = multipart::Part::stream(Body::wrap_stream(ReaderStream::new(file)))
                .file_name(file_name.clone());
            let form = multipart::Form::new()
                .text("chat_id", chat_id.to_string())
                .text("caption", truncate_message(caption, TELEGRAM_CAPTION_LIMIT))
                .part("document", part);

            let response = self
                .client
                .post(self.method_url("sendDocument"))
                .multipart(form)
                .timeout(UPLOAD_TIMEOUT)
                .send()
                .await?;
            let status = response.status();

            if status.as_u16() == 429 {
                let body: ApiResponse = response.json().await.unwrap_or_default();
                let retry_after = body
                    .parameters
                    .and_then(|p| p.retry_after)
                    .map(Duration::from_secs);

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        "Telegram rate limit: max retries ({}) exceeded, last retry_after was {:?}",
                        MAX_RATE_LIMIT_RETRIES, retry_after
                    );
                    return Err(Error::Other(format!(
                        "Telegram rate limit exceeded after {MAX_RATE_LIMIT_RETRIES} retries"
                    )));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Telegram rate limited (429), waiting {:?} before upload retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            let body: ApiResponse = response.json().await?;
            return interpret("sendDocument", status, body).map(|_| ());
        }
    }
}

fn interpret(method: &str, status: reqwest::StatusCode, body: ApiResponse) -> Result<Value> {
    if body.ok {
        return Ok(body.result.unwrap_or(Value::Null));
    }
    let description = body
        .description
        .unwrap_or_else(|| format!("HTTP {status}"));
    warn!("Telegram {} failed: {}", method, description);
    Err(Error::Other(format!("Telegram {method} failed: {description}")))
}

/// Truncate a message to fit within a Telegram character limit.
fn truncate_message(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let suffix = "\n\n[truncated]";
    let budget = limit - suffix.len();
    let truncated: String = text.chars().take(budget).collect();
    format!("{truncated}{suffix}")
}
