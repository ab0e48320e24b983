//! ffmpeg subprocess invoker.
//!
//! Resolves the binary once (configured override, then the
//! `FFMPEG_PATH` environment variable, then `ffmpeg` on PATH), verifies
//! it at startup, and turns non-zero exits into typed failures carrying
//! the tail of the diagnostic output.

use std::process::Stdio;

#[cfg(windows)]
use std::os::windows::process::CommandExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How much of the end of stderr is preserved in toolchain errors.
const STDERR_TAIL_BYTES: usize = 800;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Handle to the resolved ffmpeg binary.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    pub fn new(override_path: Option<String>) -> Self {
        let program = override_path
            .filter(|p| !p.trim().is_empty())
            .or_else(|| std::env::var("FFMPEG_PATH").ok())
            .unwrap_or_else(|| "ffmpeg".to_string());
        Self { program }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        // Keep tool diagnostics parseable regardless of system locale
        cmd.env("LC_ALL", "C");
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd
    }

    /// Runs `-version` and returns the reported version line.
    ///
    /// A missing or broken binary is a fatal startup condition; nothing
    /// enqueued may run without the toolchain.
    pub async fn verify(&self) -> Result<String> {
        let output = self
            .command()
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                Error::config(format!(
                    "ffmpeg is not runnable at '{}': {e}",
                    self.program
                ))
            })?;

        if !output.status.success() {
            return Err(Error::config(format!(
                "'{} -version' failed: {}",
                self.program,
                diagnostic_tail(&output.stderr, STDERR_TAIL_BYTES)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("unknown version").to_string())
    }

    /// Runs one toolchain invocation to completion.
    pub async fn run(&self, stage: &str, args: &[String]) -> Result<()> {
        debug!(stage, program = %self.program, ?args, "invoking toolchain");

        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| Error::toolchain(stage, format!("failed to start '{}': {e}", self.program)))?;

        if output.status.success() {
            return Ok(());
        }

        let status = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "terminated by signal".to_string());
        let tail = diagnostic_tail(&output.stderr, STDERR_TAIL_BYTES);
        warn!(stage, status = %status, "toolchain invocation failed");
        Err(Error::toolchain(stage, format!("exit status {status}: {tail}")))
    }
}

/// Last `max_bytes` of a diagnostic stream, cut on a char boundary.
pub(crate) fn diagnostic_tail(stderr: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.is_empty() {
        return "(no diagnostic output)".to_string();
    }
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("... {}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_of_empty_output_is_a_placeholder() {
        assert_eq!(diagnostic_tail(b"", 100), "(no diagnostic output)");
        assert_eq!(diagnostic_tail(b"  \n ", 100), "(no diagnostic output)");
    }

    #[test]
    fn short_output_passes_through() {
        assert_eq!(diagnostic_tail(b"403 Forbidden", 100), "403 Forbidden");
    }

    #[test]
    fn long_output_keeps_only_the_tail() {
        let noise = "x".repeat(2000);
        let stderr = format!("{noise}server returned 403 Forbidden");
        let tail = diagnostic_tail(stderr.as_bytes(), STDERR_TAIL_BYTES);
        assert!(tail.starts_with("... "));
        assert!(tail.contains("403 Forbidden"));
        assert!(tail.len() <= STDERR_TAIL_BYTES + 4);
    }

    #[test]
    fn tail_respects_char_boundaries() {
        // 3-byte chars guarantee the naive cut offset is mid-sequence
        let stderr = "€".repeat(1000);
        let tail = diagnostic_tail(stderr.as_bytes(), STDERR_TAIL_BYTES);
        assert!(tail.chars().skip(4).all(|c| c == '€'));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::super::*;
        use std::path::{Path, PathBuf};

        fn fake_tool(dir: &Path, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join("fake-ffmpeg.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        #[tokio::test]
        async fn nonzero_exit_surfaces_the_stderr_tail() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo '403 Forbidden' >&2\nexit 1");
            let ffmpeg = Ffmpeg::new(Some(tool.to_string_lossy().into_owned()));

            let err = ffmpeg.run("fetch", &[]).await.unwrap_err();
            match err {
                Error::Toolchain { stage, detail } => {
                    assert_eq!(stage, "fetch");
                    assert!(detail.contains("403 Forbidden"), "detail: {detail}");
                    assert!(detail.contains("exit status 1"), "detail: {detail}");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }

        #[tokio::test]
        async fn successful_invocation_is_ok() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "exit 0");
            let ffmpeg = Ffmpeg::new(Some(tool.to_string_lossy().into_owned()));
            ffmpeg.run("fetch", &[]).await.unwrap();
        }

        #[tokio::test]
        async fn verify_reports_the_version_line() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo 'ffmpeg version 7.1-test'");
            let ffmpeg = Ffmpeg::new(Some(tool.to_string_lossy().into_owned()));
            assert_eq!(ffmpeg.verify().await.unwrap(), "ffmpeg version 7.1-test");
        }

        #[tokio::test]
        async fn verify_fails_for_a_missing_binary() {
            let ffmpeg = Ffmpeg::new(Some("/nonexistent/ffmpeg".to_string()));
            let err = ffmpeg.verify().await.unwrap_err();
            assert!(matches!(err, Error::Configuration(_)));
        }
    }
}
