//! Artifact naming and cleanup.
//!
//! Every job derives one collision-free path family under the shared
//! output directory. Nothing else namespaces concurrent jobs, so the
//! random suffix is what keeps parallel runs from clobbering each
//! other.

use std::path::{Path, PathBuf};

use tracing::warn;

/// Maximum length of the sanitized subject component.
const SUBJECT_SLUG_MAX: usize = 48;

/// The per-run file path family.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    /// `{base}` without any extension, unique per run.
    pub base: String,
    /// Raw remux of the source stream.
    pub raw: PathBuf,
    /// Output of the watermark stage.
    pub watermarked: PathBuf,
    /// Final deliverable.
    pub artifact: PathBuf,
    /// Watermark text sidecar consumed by the overlay filter.
    pub sidecar: PathBuf,
    /// Extracted cover frame, only present when no static thumbnail is
    /// configured.
    pub thumb_frame: PathBuf,
}

impl ArtifactPaths {
    /// Derives the path family for one job.
    ///
    /// The base combines the subject, the sequence number and a random
    /// 48-bit suffix. Repeated sequence numbers draw from the same
    /// suffix space, so it has to be wide enough that birthday
    /// collisions stay negligible across a process lifetime.
    pub fn derive(output_dir: &Path, subject: &str, seq: u32) -> Self {
        let suffix = rand::random::<u64>() & 0xffff_ffff_ffff;
        let base = format!("{}_{}_{:012x}", sanitize_subject(subject), seq, suffix);
        Self {
            raw: output_dir.join(format!("{base}.tmp.mp4")),
            watermarked: output_dir.join(format!("{base}.water.mp4")),
            artifact: output_dir.join(format!("{base}.mp4")),
            sidecar: output_dir.join(format!("{base}.txt")),
            thumb_frame: output_dir.join(format!("{base}.thumb.jpg")),
            base,
        }
    }

    /// Removes every path the run may have created.
    ///
    /// Idempotent: missing files are not an error. Removal failures are
    /// logged and swallowed so cleanup can never mask the error that
    /// ended the run. When `keep_artifact` is set the final artifact is
    /// retained and only the intermediate files are removed.
    pub async fn cleanup(&self, keep_artifact: bool) {
        let mut targets: Vec<&Path> = vec![
            &self.raw,
            &self.watermarked,
            &self.sidecar,
            &self.thumb_frame,
        ];
        if !keep_artifact {
            targets.push(&self.artifact);
        }

        for path in targets {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
                }
            }
        }
    }
}

/// Reduces an arbitrary subject label to a filesystem-safe slug.
fn sanitize_subject(subject: &str) -> String {
    let mut slug = String::new();
    let mut last_was_sep = true;
    for ch in subject.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
        if slug.len() >= SUBJECT_SLUG_MAX {
            break;
        }
    }
    let slug = slug.trim_end_matches('_').to_string();
    if slug.is_empty() { "lecture".to_string() } else { slug }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn derives_the_expected_family() {
        let paths = ArtifactPaths::derive(Path::new("/out"), "Physics", 4);
        assert!(paths.raw.to_str().unwrap().ends_with(".tmp.mp4"));
        assert!(paths.watermarked.to_str().unwrap().ends_with(".water.mp4"));
        assert!(paths.sidecar.to_str().unwrap().ends_with(".txt"));
        assert!(paths.thumb_frame.to_str().unwrap().ends_with(".thumb.jpg"));
        assert!(paths.artifact.to_str().unwrap().starts_with("/out/Physics_4_"));
        assert!(!paths.artifact.to_str().unwrap().ends_with(".tmp.mp4"));

        let suffix = paths.base.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 12, "suffix: {suffix}");
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn sanitizes_hostile_subject_labels() {
        assert_eq!(sanitize_subject("Maths II: Algebra/Sets"), "Maths_II_Algebra_Sets");
        assert_eq!(sanitize_subject("../../etc/passwd"), "etc_passwd");
        assert_eq!(sanitize_subject("???"), "lecture");
        assert!(sanitize_subject(&"x".repeat(500)).len() <= SUBJECT_SLUG_MAX);
    }

    #[test]
    fn ten_thousand_runs_do_not_collide() {
        let out = Path::new("/out");
        let mut seen = HashSet::new();
        for i in 0..10_000u32 {
            // Repeated sequence numbers must still be unique
            let paths = ArtifactPaths::derive(out, "Subject", i % 7);
            assert!(seen.insert(paths.base.clone()), "collision at iteration {i}");
        }
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_honors_retention() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ArtifactPaths::derive(dir.path(), "Subject", 1);
        for path in [&paths.raw, &paths.watermarked, &paths.artifact, &paths.sidecar] {
            tokio::fs::write(path, b"x").await.unwrap();
        }

        paths.cleanup(true).await;
        assert!(!paths.raw.exists());
        assert!(!paths.watermarked.exists());
        assert!(!paths.sidecar.exists());
        assert!(paths.artifact.exists());

        paths.cleanup(false).await;
        assert!(!paths.artifact.exists());

        // Second pass over already-removed paths is a no-op
        paths.cleanup(false).await;
    }
}
