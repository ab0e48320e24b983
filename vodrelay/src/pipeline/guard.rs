//! Pre-flight job admission checks.
//!
//! Both checks run before any subprocess is spawned: a malformed
//! locator or a full disk must never cost an ffmpeg invocation.

use std::path::{Path, PathBuf};

use sysinfo::Disks;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

/// Recognized streaming-manifest extensions, lowercase.
const MANIFEST_EXTENSIONS: &[&str] = &["m3u8", "m3u"];

/// Free space must exceed this percentage of the maximum artifact size.
const FREE_SPACE_FACTOR_PERCENT: u64 = 150;

/// Admission checks shared by all workers.
pub struct ResourceGuard {
    output_dir: PathBuf,
    max_artifact_bytes: u64,
}

impl ResourceGuard {
    pub fn new(output_dir: PathBuf, max_artifact_bytes: u64) -> Self {
        Self {
            output_dir,
            max_artifact_bytes,
        }
    }

    /// Validates one job before its run starts.
    pub fn admit(&self, source_url: &str) -> Result<()> {
        validate_source_url(source_url)?;
        self.check_free_space()?;
        Ok(())
    }

    /// Requires free space on the output volume to exceed 1.5x the
    /// configured maximum artifact size.
    fn check_free_space(&self) -> Result<()> {
        let required = self.max_artifact_bytes.saturating_mul(FREE_SPACE_FACTOR_PERCENT) / 100;

        match available_space_for(&self.output_dir) {
            Some(available) if available < required => Err(Error::resource(format!(
                "insufficient disk space on output volume: {available} bytes available, {required} required"
            ))),
            Some(available) => {
                debug!(available, required, "disk space check passed");
                Ok(())
            }
            None => {
                warn!(
                    path = %self.output_dir.display(),
                    "could not determine free space for output volume, allowing job"
                );
                Ok(())
            }
        }
    }
}

/// Rejects locators that are not absolute HTTP(S) manifest URLs.
pub fn validate_source_url(raw: &str) -> Result<()> {
    let url = Url::parse(raw)
        .map_err(|e| Error::validation(format!("source locator is not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::validation(format!(
                "source locator must use http or https, got {other:?}"
            )));
        }
    }

    let extension = url
        .path()
        .rsplit('.')
        .next()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !url.path().contains('.') || !MANIFEST_EXTENSIONS.contains(&extension.as_str()) {
        return Err(Error::validation(format!(
            "source locator does not reference a streaming manifest ({})",
            MANIFEST_EXTENSIONS
                .iter()
                .map(|e| format!(".{e}"))
                .collect::<Vec<_>>()
                .join(", ")
        )));
    }

    Ok(())
}

/// Available bytes on the disk with the longest mount point containing
/// `path`, or `None` when no disk matches.
fn available_space_for(path: &Path) -> Option<u64> {
    let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let path_str = path.to_string_lossy();
    let disks = Disks::new_with_refreshed_list();

    let mut best_match: Option<(&sysinfo::Disk, usize)> = None;
    for disk in disks.list() {
        let mount_point = disk.mount_point().to_string_lossy();
        if path_str.starts_with(mount_point.as_ref()) {
            let mount_len = mount_point.len();
            if best_match.is_none_or(|(_, len)| mount_len > len) {
                best_match = Some((disk, mount_len));
            }
        }
    }

    best_match.map(|(disk, _)| disk.available_space())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_manifest_urls() {
        for url in [
            "https://cdn.example.com/lectures/phy-01.m3u8",
            "http://cdn.example.com/live/index.M3U8",
            "https://cdn.example.com/stream.m3u8?token=a:b/c",
            "https://cdn.example.com/old/list.m3u",
        ] {
            assert!(validate_source_url(url).is_ok(), "rejected {url}");
        }
    }

    #[test]
    fn rejects_non_manifest_urls() {
        for url in [
            "ftp://cdn.example.com/lectures/phy-01.m3u8",
            "file:///etc/passwd",
            "https://cdn.example.com/lecture.mp4",
            "https://cdn.example.com/lectures/",
            "not a url at all",
            "lectures/phy-01.m3u8",
        ] {
            let err = validate_source_url(url).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "accepted {url}");
        }
    }

    #[test]
    fn admit_passes_for_small_requirements() {
        let dir = tempfile::tempdir().unwrap();
        let guard = ResourceGuard::new(dir.path().to_path_buf(), 1);
        guard.admit("https://cdn.example.com/a.m3u8").unwrap();
    }

    #[test]
    fn admit_rejects_absurd_space_requirements() {
        let dir = tempfile::tempdir().unwrap();
        // Environments without visible disks report Unknown and admit
        if available_space_for(dir.path()).is_none() {
            return;
        }
        let guard = ResourceGuard::new(dir.path().to_path_buf(), u64::MAX / 2);
        let err = guard.admit("https://cdn.example.com/a.m3u8").unwrap_err();
        assert!(matches!(err, Error::Resource(_)));
    }
}
