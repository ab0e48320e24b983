//! Chat-command front end.
//!
//! Long-polls the Bot API and turns operator commands into job
//! submissions. The flow mirrors a manual batch entry: `/batch
//! Batch|Subject` opens a pending batch, plain-text lines add manifest
//! links, `DONE` enqueues one job per link with sequence numbers
//! 1..=N. Only the configured operator may drive commands; the core
//! never re-authenticates.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::api::{BotClient, Message};
use crate::pipeline::job::Job;
use crate::pipeline::queue::JobQueue;

/// Server-side long-poll window in seconds.
const POLL_TIMEOUT_SECS: u64 = 25;

/// Batch metadata collected before its links arrive.
#[derive(Debug, Default)]
struct PendingBatch {
    batch: String,
    subject: String,
    links: Vec<String>,
}

/// The operator-facing command loop.
pub struct BotFrontEnd {
    client: Arc<BotClient>,
    queue: Arc<JobQueue>,
    admin_id: i64,
    pending: HashMap<i64, PendingBatch>,
}

impl BotFrontEnd {
    pub fn new(client: Arc<BotClient>, queue: Arc<JobQueue>, admin_id: i64) -> Self {
        Self {
            client,
            queue,
            admin_id,
            pending: HashMap::new(),
        }
    }

    /// Polls for updates until cancelled.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!(admin_id = self.admin_id, "bot front end started");
        let mut offset = 0i64;

        loop {
            let updates = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("bot front end shutting down");
                    return;
                }
                updates = self.client.get_updates(offset, POLL_TIMEOUT_SECS) => updates,
            };

            let updates = match updates {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, backing off");
                    tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);
                let Some(message) = update.message else { continue };
                if let Some(reply) = self.handle_message(&message) {
                    if let Err(e) = self.client.send_message(message.chat.id, &reply).await {
                        warn!(chat = message.chat.id, error = %e, "could not send reply");
                    }
                }
            }
        }
    }

    /// Processes one incoming message, returning the reply text.
    fn handle_message(&mut self, message: &Message) -> Option<String> {
        let text = message.text.as_deref()?.trim();
        if text.is_empty() {
            return None;
        }
        let from = message.from.as_ref().map(|u| u.id).unwrap_or_default();

        if from != self.admin_id {
            debug!(from, "ignoring message from non-operator");
            // Commands get a refusal; anything else is dropped silently
            return text
                .starts_with('/')
                .then(|| "You are not authorized to use this bot.".to_string());
        }

        self.respond(message.chat.id, text)
    }

    fn respond(&mut self, chat: i64, text: &str) -> Option<String> {
        if let Some(rest) = text.strip_prefix("/batch") {
            // Exact command only: "/batches" is not "/batch es"
            if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                return Some(self.open_batch(chat, rest));
            }
        }
        match text {
            "/start" => Some(
                "Send /batch Batch|Subject, then one manifest link per line, \
                 then DONE to queue the batch. /status shows the queue."
                    .to_string(),
            ),
            "/status" => Some(format!("{} job(s) pending", self.queue.queue_size())),
            "DONE" => Some(self.close_batch(chat)),
            _ if text.starts_with('/') => Some("Unknown command. Try /start.".to_string()),
            _ => Some(self.collect_links(chat, text)),
        }
    }

    fn open_batch(&mut self, chat: i64, rest: &str) -> String {
        let Some((batch, subject)) = rest.trim().split_once('|') else {
            return "Usage: /batch Batch name|Subject name".to_string();
        };
        let batch = batch.trim();
        let subject = subject.trim();
        if batch.is_empty() || subject.is_empty() {
            return "Both the batch and the subject name are required.".to_string();
        }

        self.pending.insert(
            chat,
            PendingBatch {
                batch: batch.to_string(),
                subject: subject.to_string(),
                links: Vec::new(),
            },
        );
        format!("Batch \"{batch}\" / \"{subject}\" opened. Send links, then DONE.")
    }

    fn collect_links(&mut self, chat: i64, text: &str) -> String {
        let Some(pending) = self.pending.get_mut(&chat) else {
            return "Open a batch first with /batch Batch|Subject.".to_string();
        };

        let added = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| pending.links.push(line.to_string()))
            .count();
        format!("Added {added} link(s), {} total.", pending.links.len())
    }

    fn close_batch(&mut self, chat: i64) -> String {
        let Some(pending) = self.pending.remove(&chat) else {
            return "No open batch. Start one with /batch Batch|Subject.".to_string();
        };
        if pending.links.is_empty() {
            return "The batch had no links; nothing queued.".to_string();
        }

        let total = pending.links.len() as u32;
        for (index, link) in pending.links.iter().enumerate() {
            self.queue.enqueue(Job::new(
                link,
                &pending.batch,
                &pending.subject,
                index as u32 + 1,
                total,
                chat,
            ));
        }
        info!(batch = %pending.batch, subject = %pending.subject, total, "batch queued");
        format!("Queued {total} lecture(s) for \"{}\".", pending.subject)
    }
}
