//! Per-job pipeline orchestration.
//!
//! One [`RunContext`] is shared read-only by all workers; each call to
//! [`RunContext::run`] owns one job from admission to cleanup. Cleanup
//! of the derived path family happens on every exit path and its own
//! failures are logged, never raised.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::artifact::ArtifactPaths;
use super::guard::ResourceGuard;
use super::job::Job;
use crate::config::Config;
use crate::delivery::{self, Uploader};
use crate::media::ffmpeg::Ffmpeg;
use crate::media::stages::StagePipeline;
use crate::notify::{Notifier, StatusHandle};
use crate::telegram::api::BotClient;

/// Everything a worker needs to drive one job end to end. Immutable
/// after construction.
pub struct RunContext {
    guard: ResourceGuard,
    stages: StagePipeline,
    uploader: Arc<dyn Uploader>,
    notifier: Arc<dyn Notifier>,
    output_dir: PathBuf,
    attribution: String,
    keep_artifact: bool,
}

impl RunContext {
    pub fn new(
        guard: ResourceGuard,
        stages: StagePipeline,
        uploader: Arc<dyn Uploader>,
        notifier: Arc<dyn Notifier>,
        output_dir: PathBuf,
        attribution: String,
        keep_artifact: bool,
    ) -> Self {
        Self {
            guard,
            stages,
            uploader,
            notifier,
            output_dir,
            attribution,
            keep_artifact,
        }
    }

    /// Builds the production context, resolving the delivery backend.
    ///
    /// Backend resolution probes session authorization; a failed probe
    /// falls back to the capped backend and is logged, never fatal.
    pub async fn resolve(config: &Config, ffmpeg: Ffmpeg, client: Arc<BotClient>) -> Self {
        let uploader = delivery::resolve_uploader(config, client.clone()).await;
        info!(backend = uploader.name(), "delivery backend resolved");

        Self::new(
            ResourceGuard::new(config.output_dir(), config.max_artifact_bytes),
            StagePipeline::new(
                ffmpeg,
                config.watermark_text.clone(),
                config.thumbnail_path.clone(),
            ),
            uploader,
            Arc::new(crate::notify::TelegramNotifier::new(client)),
            config.output_dir(),
            config.attribution.clone(),
            config.keep_artifact,
        )
    }

    /// Runs one job to completion.
    ///
    /// Admission runs before any path is derived or any subprocess is
    /// spawned. Whatever the outcome, every path the run may have
    /// created is removed before returning; on success the final
    /// artifact survives only when retention is configured. Both
    /// terminal outcomes edit the status message in place, so the
    /// requester never sees a stale progress line.
    pub async fn run(&self, job: &Job) -> crate::error::Result<()> {
        let status = match self
            .notifier
            .send(job.requester_chat, &format!("⏳ {}: starting", job.label()))
            .await
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "could not send status message");
                None
            }
        };

        let result = self.drive(job, status).await;
        if let Err(e) = &result {
            self.terminal(job, status, &format!("❌ {} failed: {e}", job.label()))
                .await;
        }
        result
    }

    async fn drive(&self, job: &Job, status: Option<StatusHandle>) -> crate::error::Result<()> {
        self.guard.admit(&job.source_url)?;

        let paths = ArtifactPaths::derive(&self.output_dir, &job.subject, job.seq);
        let result = self.execute(job, &paths, status).await;

        paths
            .cleanup(self.keep_artifact && result.is_ok())
            .await;

        result
    }

    async fn execute(
        &self,
        job: &Job,
        paths: &ArtifactPaths,
        status: Option<StatusHandle>,
    ) -> crate::error::Result<()> {
        self.progress(job, status, "fetching source stream").await;
        self.stages.fetch(&job.source_url, paths).await?;

        self.progress(job, status, "burning watermark").await;
        self.stages.watermark(paths).await?;

        self.progress(job, status, "attaching cover image").await;
        self.stages.attach_thumbnail(paths).await?;

        self.progress(job, status, "uploading artifact").await;
        let caption = delivery::compose_caption(job, &self.attribution);
        self.uploader
            .upload(&paths.artifact, job.requester_chat, &caption)
            .await?;

        // Backends that cannot attach the caption get it as a
        // follow-up message right behind the file
        if !self.uploader.carries_caption() {
            if let Err(e) = self.notifier.send(job.requester_chat, &caption).await {
                warn!(job_id = %job.id, error = %e, "could not send caption follow-up");
            }
        }

        info!(job_id = %job.id, seq = job.seq, base = %paths.base, "job delivered");
        self.terminal(job, status, &format!("✅ {}: delivered", job.label()))
            .await;
        Ok(())
    }

    /// Terminal notification, edited in place when a status message
    /// exists.
    async fn terminal(&self, job: &Job, status: Option<StatusHandle>, text: &str) {
        let outcome = match status {
            Some(handle) => self.notifier.edit(handle, text).await,
            None => self
                .notifier
                .send(job.requester_chat, text)
                .await
                .map(|_| ()),
        };
        if let Err(e) = outcome {
            warn!(job_id = %job.id, error = %e, "could not deliver terminal notification");
        }
    }

    /// Best-effort in-place progress update.
    async fn progress(&self, job: &Job, status: Option<StatusHandle>, step: &str) {
        let Some(handle) = status else { return };
        let text = format!("⏳ {}: {step}", job.label());
        if let Err(e) = self.notifier.edit(handle, &text).await {
            warn!(job_id = %job.id, error = %e, "could not update status message");
        }
    }
}
