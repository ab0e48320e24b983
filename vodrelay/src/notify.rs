//! Requester-facing notifications.
//!
//! Workers report progress and terminal outcomes through a [`Notifier`]
//! so the pipeline never talks to the transport directly. The real
//! implementation edits a single status message in place; tests swap in
//! the recording double.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::telegram::api::BotClient;

/// Reference to a previously sent status message, used for in-place
/// edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusHandle {
    pub chat: i64,
    pub message_id: i64,
}

/// Sends text notifications to a recipient. Both operations are
/// fallible network calls; callers decide whether a failure is
/// best-effort or terminal.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends a new message and returns a handle for later edits.
    async fn send(&self, chat: i64, text: &str) -> Result<StatusHandle>;

    /// Replaces the text of a previously sent message.
    async fn edit(&self, handle: StatusHandle, text: &str) -> Result<()>;
}

/// Notifier backed by the Telegram Bot API.
pub struct TelegramNotifier {
    client: Arc<BotClient>,
}

impl TelegramNotifier {
    pub fn new(client: Arc<BotClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, chat: i64, text: &str) -> Result<StatusHandle> {
        let message = self.client.send_message(chat, text).await?;
        Ok(StatusHandle {
            chat: message.chat.id,
            message_id: message.message_id,
        })
    }

    async fn edit(&self, handle: StatusHandle, text: &str) -> Result<()> {
        self.client
            .edit_message_text(handle.chat, handle.message_id, text)
            .await
    }
}

/// In-memory notifier that records everything it is asked to send.
/// Test double; not wired up in production.
#[derive(Default)]
pub struct RecordingNotifier {
    inner: parking_lot::Mutex<RecordingInner>,
}

#[derive(Default)]
struct RecordingInner {
    next_message_id: i64,
    sent: Vec<(i64, String)>,
    edits: Vec<(i64, String)>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far, as `(chat, text)` pairs in order.
    pub fn sent(&self) -> Vec<(i64, String)> {
        self.inner.lock().sent.clone()
    }

    /// Edits applied so far, as `(message_id, text)` pairs in order.
    pub fn edits(&self) -> Vec<(i64, String)> {
        self.inner.lock().edits.clone()
    }

    /// All texts that reached the recipient, sends and edits combined.
    pub fn all_texts(&self) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .sent
            .iter()
            .map(|(_, t)| t.clone())
            .chain(inner.edits.iter().map(|(_, t)| t.clone()))
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, chat: i64, text: &str) -> Result<StatusHandle> {
        let mut inner = self.inner.lock();
        inner.next_message_id += 1;
        let message_id = inner.next_message_id;
        inner.sent.push((chat, text.to_string()));
        Ok(StatusHandle { chat, message_id })
    }

    async fn edit(&self, handle: StatusHandle, text: &str) -> Result<()> {
        self.inner
            .lock()
            .edits
            .push((handle.message_id, text.to_string()));
        Ok(())
    }
}
