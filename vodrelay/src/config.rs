//! Process configuration, loaded from the environment.

use std::path::PathBuf;

use crate::error::{Error, Result};

const DEFAULT_MAX_ARTIFACT_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_WORKERS: usize = 1;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Credentials for the pre-authenticated large-file upload session.
///
/// All three values must be provided together; a partial set is a
/// configuration error so a typo cannot silently downgrade delivery to
/// the capped backend.
#[derive(Debug, Clone)]
pub struct SessionCredentials {
    pub session_token: String,
    pub app_id: i64,
    pub app_hash: String,
    /// Override for the upload tool binary. Falls back to `tdl` on PATH.
    pub tool_path: Option<String>,
    /// Directory holding the tool's session storage.
    pub session_dir: Option<PathBuf>,
    /// Override for the upload argument template. Supports the
    /// `{input}`, `{recipient}` and `{caption}` placeholders.
    pub upload_args: Option<Vec<String>>,
}

/// Runtime configuration for the whole process.
#[derive(Debug, Clone)]
pub struct Config {
    pub bot_token: String,
    pub admin_id: i64,
    pub work_dir: PathBuf,
    pub thumbnail_path: PathBuf,
    pub watermark_text: String,
    pub attribution: String,
    pub ffmpeg_path: Option<String>,
    pub max_artifact_bytes: u64,
    pub workers: usize,
    pub poll_interval_ms: u64,
    /// Retain the final artifact after delivery instead of removing it.
    pub keep_artifact: bool,
    pub session: Option<SessionCredentials>,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bot_token = get("BOT_TOKEN")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::config("BOT_TOKEN must be set"))?;

        let admin_id = get("ADMIN_ID")
            .ok_or_else(|| Error::config("ADMIN_ID must be set"))?
            .trim()
            .parse::<i64>()
            .map_err(|e| Error::config(format!("ADMIN_ID must be a numeric chat id: {e}")))?;

        let work_dir = PathBuf::from(get("WORKDIR").unwrap_or_else(|| "./work".to_string()));

        let thumbnail_path = get("THUMB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| work_dir.join("thumb.jpg"));

        let watermark_text = get("WATERMARK_TEXT")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| Error::config("WATERMARK_TEXT must be set"))?;

        let attribution = get("ATTRIBUTION").unwrap_or_default();

        let max_artifact_bytes =
            parse_or_default(&get, "MAX_ARTIFACT_BYTES", DEFAULT_MAX_ARTIFACT_BYTES)?;
        let workers = parse_or_default(&get, "WORKERS", DEFAULT_WORKERS)?;
        if workers == 0 {
            return Err(Error::config("WORKERS must be at least 1"));
        }
        let poll_interval_ms =
            parse_or_default(&get, "POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;

        let session = session_from_lookup(&get)?;

        Ok(Self {
            bot_token,
            admin_id,
            work_dir,
            thumbnail_path,
            watermark_text,
            attribution,
            ffmpeg_path: get("FFMPEG_PATH"),
            max_artifact_bytes,
            workers,
            poll_interval_ms,
            keep_artifact: parse_bool(get("KEEP_ARTIFACT").as_deref()),
            session,
        })
    }

    /// Directory that receives in-progress and final artifacts.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("out")
    }

    /// Directory that receives rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Creates the working directories if they do not exist yet.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        std::fs::create_dir_all(self.output_dir())?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

fn session_from_lookup(
    get: &impl Fn(&str) -> Option<String>,
) -> Result<Option<SessionCredentials>> {
    let token = get("TG_SESSION_TOKEN").filter(|v| !v.trim().is_empty());
    let app_id = get("TG_APP_ID").filter(|v| !v.trim().is_empty());
    let app_hash = get("TG_APP_HASH").filter(|v| !v.trim().is_empty());

    match (token, app_id, app_hash) {
        (None, None, None) => Ok(None),
        (Some(token), Some(app_id), Some(app_hash)) => {
            let app_id = app_id.trim().parse::<i64>().map_err(|e| {
                Error::config(format!("TG_APP_ID must be a numeric application id: {e}"))
            })?;
            Ok(Some(SessionCredentials {
                session_token: token,
                app_id,
                app_hash,
                tool_path: get("TDL_PATH"),
                session_dir: get("TDL_SESSION_DIR").map(PathBuf::from),
                upload_args: get("TDL_UPLOAD_ARGS").and_then(|raw| {
                    let args: Vec<String> =
                        raw.split_whitespace().map(str::to_string).collect();
                    (!args.is_empty()).then_some(args)
                }),
            }))
        }
        _ => Err(Error::config(
            "TG_SESSION_TOKEN, TG_APP_ID and TG_APP_HASH must be set together",
        )),
    }
}

fn parse_or_default<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| Error::config(format!("{key} is invalid: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("BOT_TOKEN", "123:abc"),
            ("ADMIN_ID", "42"),
            ("WORKDIR", "/tmp/vodrelay-test"),
            ("WATERMARK_TEXT", "Lecture Relay"),
        ])
    }

    fn load(env: &HashMap<&str, &str>) -> Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.admin_id, 42);
        assert_eq!(config.workers, 1);
        assert_eq!(config.max_artifact_bytes, DEFAULT_MAX_ARTIFACT_BYTES);
        assert_eq!(config.thumbnail_path, PathBuf::from("/tmp/vodrelay-test/thumb.jpg"));
        assert_eq!(config.output_dir(), PathBuf::from("/tmp/vodrelay-test/out"));
        assert!(config.session.is_none());
        assert!(!config.keep_artifact);
    }

    #[test]
    fn missing_token_is_a_configuration_error() {
        let mut env = base_env();
        env.remove("BOT_TOKEN");
        assert!(matches!(load(&env), Err(Error::Configuration(_))));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut env = base_env();
        env.insert("WORKERS", "0");
        assert!(matches!(load(&env), Err(Error::Configuration(_))));
    }

    #[test]
    fn partial_session_triple_is_rejected() {
        let mut env = base_env();
        env.insert("TG_SESSION_TOKEN", "sess");
        env.insert("TG_APP_ID", "1234");
        assert!(matches!(load(&env), Err(Error::Configuration(_))));
    }

    #[test]
    fn complete_session_triple_is_parsed() {
        let mut env = base_env();
        env.insert("TG_SESSION_TOKEN", "sess");
        env.insert("TG_APP_ID", "1234");
        env.insert("TG_APP_HASH", "deadbeef");
        env.insert("TDL_SESSION_DIR", "/tmp/tdl");
        let session = load(&env).unwrap().session.unwrap();
        assert_eq!(session.app_id, 1234);
        assert_eq!(session.session_dir, Some(PathBuf::from("/tmp/tdl")));
    }

    #[test]
    fn keep_artifact_accepts_truthy_values() {
        for value in ["1", "true", "YES", "on"] {
            let mut env = base_env();
            env.insert("KEEP_ARTIFACT", value);
            assert!(load(&env).unwrap().keep_artifact, "value {value:?}");
        }
        let mut env = base_env();
        env.insert("KEEP_ARTIFACT", "0");
        assert!(!load(&env).unwrap().keep_artifact);
    }
}
