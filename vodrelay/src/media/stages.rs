//! The three transcoding stages: fetch, watermark, thumbnail attach.
//!
//! Each stage is one ffmpeg invocation consuming the previous stage's
//! output, followed by an existence and non-zero-size check on the file
//! it was supposed to produce.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::ffmpeg::Ffmpeg;
use crate::error::{Error, Result};
use crate::pipeline::artifact::ArtifactPaths;

/// Probed in order; the first existing file wins.
const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

/// Generic family handed to fontconfig when no candidate file exists.
const FALLBACK_FONT_FAMILY: &str = "Sans";

/// Where in the video the fallback cover frame is taken from.
const COVER_FRAME_OFFSET_SECS: f64 = 5.0;
const COVER_FRAME_WIDTH: u32 = 320;

/// Font handed to the drawtext filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontSource {
    File(PathBuf),
    Family(&'static str),
}

fn select_font() -> FontSource {
    select_font_from(FONT_CANDIDATES.iter().map(Path::new))
}

fn select_font_from<'a>(candidates: impl IntoIterator<Item = &'a Path>) -> FontSource {
    for candidate in candidates {
        if candidate.is_file() {
            return FontSource::File(candidate.to_path_buf());
        }
    }
    FontSource::Family(FALLBACK_FONT_FAMILY)
}

/// Drives the ordered stage sequence for one job.
pub struct StagePipeline {
    ffmpeg: Ffmpeg,
    watermark_text: String,
    thumbnail_path: PathBuf,
}

impl StagePipeline {
    pub fn new(ffmpeg: Ffmpeg, watermark_text: String, thumbnail_path: PathBuf) -> Self {
        Self {
            ffmpeg,
            watermark_text,
            thumbnail_path,
        }
    }

    /// Remuxes the remote manifest into the raw container. Stream copy
    /// only; the ADTS-to-ASC bitstream filter is the one permitted
    /// transformation.
    pub async fn fetch(&self, source_url: &str, paths: &ArtifactPaths) -> Result<()> {
        let args = fetch_args(source_url, &paths.raw);
        self.ffmpeg.run("fetch", &args).await?;
        ensure_output("fetch", &paths.raw).await
    }

    /// Burns the watermark text into the video and re-encodes to
    /// web-compatible codecs with a streaming-friendly layout.
    pub async fn watermark(&self, paths: &ArtifactPaths) -> Result<()> {
        // The sidecar keeps arbitrary text out of the filter expression
        tokio::fs::write(&paths.sidecar, &self.watermark_text).await?;

        let font = select_font();
        debug!(?font, "selected watermark font");
        let args = watermark_args(&paths.raw, &paths.sidecar, &font, &paths.watermarked);
        self.ffmpeg.run("watermark", &args).await?;
        ensure_output("watermark", &paths.watermarked).await
    }

    /// Muxes a cover image into the final artifact.
    ///
    /// Prefers the configured thumbnail image, falls back to a frame
    /// extracted from the watermarked video, and if no cover can be
    /// attached renames the watermarked file so the job still delivers.
    pub async fn attach_thumbnail(&self, paths: &ArtifactPaths) -> Result<()> {
        let attached = match self.resolve_cover(paths).await {
            Some(cover) => {
                let args = attach_args(&paths.watermarked, &cover, &paths.artifact);
                match self.ffmpeg.run("thumbnail", &args).await {
                    Ok(()) => ensure_output("thumbnail", &paths.artifact).await.is_ok(),
                    Err(e) => {
                        warn!(error = %e, "cover attach failed, delivering without cover");
                        false
                    }
                }
            }
            None => false,
        };

        if !attached {
            tokio::fs::rename(&paths.watermarked, &paths.artifact).await?;
        }
        ensure_output("thumbnail", &paths.artifact).await
    }

    /// Picks the cover image source for this run, if any.
    async fn resolve_cover(&self, paths: &ArtifactPaths) -> Option<PathBuf> {
        match tokio::fs::metadata(&self.thumbnail_path).await {
            Ok(meta) if meta.len() > 0 => return Some(self.thumbnail_path.clone()),
            _ => {}
        }

        let args = frame_args(&paths.watermarked, &paths.thumb_frame);
        match self.ffmpeg.run("thumbnail", &args).await {
            Ok(()) => match tokio::fs::metadata(&paths.thumb_frame).await {
                Ok(meta) if meta.len() > 0 => Some(paths.thumb_frame.clone()),
                _ => {
                    warn!("cover frame extraction produced no usable image");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "cover frame extraction failed");
                None
            }
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn fetch_args(source_url: &str, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        source_url.to_string(),
        "-c".into(),
        "copy".into(),
        "-bsf:a".into(),
        "aac_adtstoasc".into(),
        path_arg(output),
    ]
}

fn watermark_args(input: &Path, sidecar: &Path, font: &FontSource, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        path_arg(input),
        "-vf".into(),
        drawtext_filter(sidecar, font),
        "-c:v".into(),
        "libx264".into(),
        "-profile:v".into(),
        "high".into(),
        "-level".into(),
        "4.1".into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "23".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-movflags".into(),
        "+faststart".into(),
        path_arg(output),
    ]
}

fn attach_args(video: &Path, cover: &Path, output: &Path) -> Vec<String> {
    vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-i".into(),
        path_arg(video),
        "-i".into(),
        path_arg(cover),
        "-map".into(),
        "0".into(),
        "-map".into(),
        "1".into(),
        "-c".into(),
        "copy".into(),
        "-disposition:v:1".into(),
        "attached_pic".into(),
        path_arg(output),
    ]
}

fn frame_args(video: &Path, frame: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
        "-ss".into(),
        format!("{COVER_FRAME_OFFSET_SECS:.2}"),
        "-i".into(),
        path_arg(video),
        "-vframes".into(),
        "1".into(),
        "-vf".into(),
        format!("scale={COVER_FRAME_WIDTH}:-1"),
        "-q:v".into(),
        "4".into(),
        path_arg(frame),
    ]
}

fn drawtext_filter(sidecar: &Path, font: &FontSource) -> String {
    let font_part = match font {
        FontSource::File(path) => {
            format!("fontfile='{}'", escape_filter_path(&path.to_string_lossy()))
        }
        FontSource::Family(name) => format!("font='{name}'"),
    };
    format!(
        "drawtext=textfile='{}':{font_part}:fontsize=28:fontcolor=white@0.9:x=20:y=20:box=1:boxcolor=black@0.5:boxborderw=5",
        escape_filter_path(&sidecar.to_string_lossy())
    )
}

fn escape_filter_path(path: &str) -> String {
    path.replace('\\', "\\\\").replace('\'', "\\'").replace(':', "\\:")
}

/// A stage must leave behind an existing, non-empty output file.
async fn ensure_output(stage: &str, path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        Ok(_) => Err(Error::integrity(format!(
            "{stage} stage produced an empty file at {}",
            path.display()
        ))),
        Err(_) => Err(Error::integrity(format!(
            "{stage} stage produced no output at {}",
            path.display()
        ))),
    }
}
