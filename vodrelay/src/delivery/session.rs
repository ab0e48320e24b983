//! Large-file upload through a pre-authenticated `tdl` session.
//!
//! The session credentials are injected through the tool's environment
//! rather than its command line, and the upload argument vector is a
//! template with `{input}`, `{recipient}` and `{caption}` placeholders
//! so deployments can adapt to tool version differences without a
//! rebuild.

use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::Uploader;
use crate::config::SessionCredentials;
use crate::error::{Error, Result};
use crate::media::ffmpeg::diagnostic_tail;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const OUTPUT_TAIL_BYTES: usize = 800;

/// Self-identification subcommands tried in order during the
/// authorization probe; tool versions differ on the spelling.
const SELF_ID_CANDIDATES: &[&[&str]] = &[&["me"], &["whoami"], &["account"], &["user"]];

/// Default upload argument template. `tdl up` has no caption flag, so
/// the default template cannot carry one; [`SessionUploader`] reports
/// that through `carries_caption` and the pipeline sends the caption
/// as a follow-up message instead.
const DEFAULT_UPLOAD_ARGS: &[&str] = &["up", "-p", "{input}", "-c", "{recipient}"];

/// Session-based uploader with no size ceiling.
pub struct SessionUploader {
    program: String,
    credentials: SessionCredentials,
    env: HashMap<String, String>,
}

impl SessionUploader {
    pub fn new(credentials: SessionCredentials) -> Self {
        let program = credentials
            .tool_path
            .clone()
            .filter(|p| !p.trim().is_empty())
            .or_else(|| std::env::var("TDL_PATH").ok())
            .unwrap_or_else(|| "tdl".to_string());

        let mut env = HashMap::new();
        env.insert("TDL_SESSION_TOKEN".to_string(), credentials.session_token.clone());
        env.insert("TDL_APP_ID".to_string(), credentials.app_id.to_string());
        env.insert("TDL_APP_HASH".to_string(), credentials.app_hash.clone());
        if let Some(dir) = &credentials.session_dir {
            env.insert("TDL_SESSION_DIR".to_string(), dir.to_string_lossy().into_owned());
        }

        Self {
            program,
            credentials,
            env,
        }
    }

    fn command(&self, args: &[String]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        cmd.envs(&self.env);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        if let Some(dir) = &self.credentials.session_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn run_tool(&self, args: &[String], timeout: Option<Duration>) -> Result<ToolOutput> {
        debug!(program = %self.program, ?args, "invoking upload tool");
        let future = self.command(args).output();
        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, future)
                .await
                .map_err(|_| Error::delivery(format!("'{}' timed out", self.program)))?,
            None => future.await,
        }
        .map_err(|e| Error::delivery(format!("failed to start '{}': {e}", self.program)))?;

        Ok(ToolOutput {
            success: output.status.success(),
            combined: format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
            stderr_tail: diagnostic_tail(&output.stderr, OUTPUT_TAIL_BYTES),
        })
    }

    /// Verifies the tool is runnable and the session is authorized.
    ///
    /// Best effort beyond the version check: self-identification
    /// subcommands vary between tool versions, so an unrecognized
    /// subcommand is not treated as missing authorization.
    pub async fn probe_auth(&self) -> Result<String> {
        let version = self
            .run_tool(&["--version".to_string()], Some(PROBE_TIMEOUT))
            .await?;
        if !version.success {
            return Err(Error::delivery(format!(
                "'{} --version' failed: {}",
                self.program, version.stderr_tail
            )));
        }

        for candidate in SELF_ID_CANDIDATES {
            let args: Vec<String> = candidate.iter().map(|s| s.to_string()).collect();
            let output = match self.run_tool(&args, Some(PROBE_TIMEOUT)).await {
                Ok(output) => output,
                Err(e) => {
                    debug!(?candidate, error = %e, "self-identification attempt failed");
                    continue;
                }
            };

            if is_not_logged_in(&output.combined) {
                return Err(Error::delivery(
                    "upload session is not authorized, run the tool login flow first",
                ));
            }
            if output.success {
                let identity = output
                    .combined
                    .lines()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or("unknown")
                    .trim()
                    .to_string();
                return Ok(identity);
            }
        }

        warn!(program = %self.program, "could not confirm session identity, assuming authorized");
        Ok("unknown".to_string())
    }
}

impl SessionUploader {
    fn upload_template(&self) -> Vec<String> {
        match &self.credentials.upload_args {
            Some(args) => args.clone(),
            None => DEFAULT_UPLOAD_ARGS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl Uploader for SessionUploader {
    fn name(&self) -> &'static str {
        "session"
    }

    fn carries_caption(&self) -> bool {
        self.upload_template()
            .iter()
            .any(|arg| arg.contains("{caption}"))
    }

    async fn upload(&self, artifact: &std::path::Path, recipient: i64, caption: &str) -> Result<()> {
        let template = self.upload_template();
        let args = render_args(
            &template,
            &artifact.to_string_lossy(),
            recipient,
            caption,
        );

        // No timeout: the session backend exists for uploads of
        // arbitrary size
        let output = self.run_tool(&args, None).await?;
        if !output.success {
            return Err(Error::delivery(format!(
                "session upload failed: {}",
                output.stderr_tail
            )));
        }
        debug!(path = %artifact.display(), recipient, "artifact delivered via session backend");
        Ok(())
    }
}

struct ToolOutput {
    success: bool,
    combined: String,
    stderr_tail: String,
}

/// Expands the upload argument template. When no argument mentions
/// `{input}` the artifact path is appended so a minimal template still
/// uploads the right file.
fn render_args(template: &[String], input: &str, recipient: i64, caption: &str) -> Vec<String> {
    let mut args: Vec<String> = template
        .iter()
        .map(|arg| {
            arg.replace("{input}", input)
                .replace("{recipient}", &recipient.to_string())
                .replace("{caption}", caption)
        })
        .collect();
    if !template.iter().any(|arg| arg.contains("{input}")) {
        args.push(input.to_string());
    }
    args
}

fn is_not_logged_in(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("not logged")
        || lower.contains("not authorized")
        || lower.contains("unauthorized")
        || (lower.contains("auth") && lower.contains("required"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> SessionCredentials {
        SessionCredentials {
            session_token: "sess".to_string(),
            app_id: 1234,
            app_hash: "deadbeef".to_string(),
            tool_path: None,
            session_dir: None,
            upload_args: None,
        }
    }

    #[test]
    fn default_template_expands_all_placeholders() {
        let template: Vec<String> = DEFAULT_UPLOAD_ARGS.iter().map(|s| s.to_string()).collect();
        let args = render_args(&template, "/out/a.mp4", 42, "caption text");
        assert_eq!(args, vec!["up", "-p", "/out/a.mp4", "-c", "42"]);
    }

    #[test]
    fn template_without_input_placeholder_appends_the_path() {
        let template = vec!["up".to_string(), "-c".to_string(), "{recipient}".to_string()];
        let args = render_args(&template, "/out/a.mp4", 42, "");
        assert_eq!(args, vec!["up", "-c", "42", "/out/a.mp4"]);
    }

    #[test]
    fn default_template_cannot_carry_a_caption() {
        let uploader = SessionUploader::new(credentials());
        assert!(!uploader.carries_caption());
    }

    #[test]
    fn caption_placeholder_in_the_template_is_detected() {
        let mut creds = credentials();
        creds.upload_args = Some(vec![
            "up".to_string(),
            "-p".to_string(),
            "{input}".to_string(),
            "--caption".to_string(),
            "{caption}".to_string(),
        ]);
        assert!(SessionUploader::new(creds).carries_caption());
    }

    #[test]
    fn login_state_heuristics() {
        assert!(is_not_logged_in("Error: not logged in"));
        assert!(is_not_logged_in("401 Unauthorized"));
        assert!(is_not_logged_in("authentication required"));
        assert!(!is_not_logged_in("logged in as @operator"));
        assert!(!is_not_logged_in("tdl version 0.17.0"));
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::path::{Path, PathBuf};

        fn fake_tool(dir: &Path, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join("fake-tdl.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn uploader_for(tool: &Path) -> SessionUploader {
            let mut creds = credentials();
            creds.tool_path = Some(tool.to_string_lossy().into_owned());
            SessionUploader::new(creds)
        }

        #[tokio::test]
        async fn probe_accepts_a_logged_in_session() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(
                dir.path(),
                "if [ \"$1\" = \"--version\" ]; then echo 'tdl 0.17.0'; else echo 'logged in as @operator'; fi",
            );
            let identity = uploader_for(&tool).probe_auth().await.unwrap();
            assert_eq!(identity, "logged in as @operator");
        }

        #[tokio::test]
        async fn probe_rejects_an_unauthorized_session() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(
                dir.path(),
                "if [ \"$1\" = \"--version\" ]; then echo 'tdl 0.17.0'; else echo 'not logged in' >&2; exit 1; fi",
            );
            let err = uploader_for(&tool).probe_auth().await.unwrap_err();
            assert!(matches!(err, Error::Delivery(_)), "got {err:?}");
        }

        #[tokio::test]
        async fn upload_failure_carries_the_tool_diagnostics() {
            let dir = tempfile::tempdir().unwrap();
            let tool = fake_tool(dir.path(), "echo 'flood wait 30s' >&2; exit 1");
            let err = uploader_for(&tool)
                .upload(Path::new("/out/a.mp4"), 42, "caption")
                .await
                .unwrap_err();
            assert!(err.to_string().contains("flood wait 30s"), "got {err}");
        }

        #[tokio::test]
        async fn session_credentials_reach_the_tool_environment() {
            let dir = tempfile::tempdir().unwrap();
            let marker = dir.path().join("env.txt");
            let tool = fake_tool(
                dir.path(),
                &format!("printenv TDL_APP_ID > {}", marker.display()),
            );
            uploader_for(&tool)
                .upload(Path::new("/out/a.mp4"), 42, "")
                .await
                .unwrap();
            assert_eq!(std::fs::read_to_string(&marker).unwrap().trim(), "1234");
        }
    }
}
