//! Configuration types.
//!
//! The configuration is a JSON file read once at startup. Key names follow
//! the `conf.json` layout the relay deployment has always used:
//!
//! ```json
//! {
//!   "GithubToken": "ghp_...",
//!   "GithubUser": "octocat",
//!   "GithubRepo": "blog",
//!   "Path": "content/posts",
//!   "MailgunToken": "key-...",
//!   "Authors": { "ada@example.com": "Ada" }
//! }
//! ```
//!
//! Everything else is optional and has a default.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default GitHub API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default listen address for the webhook server.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:5555";

/// Commit message used for every file written by a publish.
pub const DEFAULT_COMMIT_MESSAGE: &str = "Automatic Publish";

const DEFAULT_BRANCH: &str = "main";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_READ_ATTEMPTS: u32 = 2;

/// On-disk shape of the config file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase", deny_unknown_fields)]
struct RawConfig {
    github_token: Option<String>,
    github_user: Option<String>,
    github_repo: Option<String>,
    path: Option<String>,
    mailgun_token: Option<String>,
    #[serde(default)]
    authors: HashMap<String, String>,
    branch: Option<String>,
    assets_path: Option<String>,
    api_base: Option<String>,
    listen: Option<String>,
    timeout_secs: Option<u64>,
    read_attempts: Option<u32>,
    commit_message: Option<String>,
}

/// Process-wide configuration, immutable after load.
#[derive(Debug, Clone)]
pub struct Config {
    /// Static access token for the content store.
    pub github_token: SecretString,
    /// Repository owner (user or organization).
    pub github_user: String,
    /// Repository name.
    pub github_repo: String,
    /// Primary branch that published posts land on.
    pub branch: String,
    /// Directory in the repository that receives post files.
    pub path: String,
    /// Directory in the repository that receives attachment files.
    pub assets_path: String,
    /// Key for basic auth against the relay's attachment storage.
    pub mailgun_token: SecretString,
    /// Sender email address → display author name.
    pub authors: HashMap<String, String>,
    /// Content store API base URL.
    pub api_base: String,
    /// Address the webhook server binds to.
    pub listen: SocketAddr,
    /// Per-call timeout for every outbound HTTP request.
    pub timeout: Duration,
    /// Total attempts for the (idempotent) branch head read.
    pub read_attempts: u32,
    /// Commit message for file writes and the merge.
    pub commit_message: String,
}

impl Config {
    /// Load and validate the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&data)
    }

    /// Parse and validate a config document.
    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_json::from_str(data).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        Self::try_from(raw)
    }
}

fn required(value: Option<String>, key: &str, hint: &str) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingRequired {
            key: key.to_string(),
            hint: hint.to_string(),
        }),
    }
}

impl TryFrom<RawConfig> for Config {
    type Error = ConfigError;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let github_token = required(
            raw.github_token,
            "GithubToken",
            "Create a token with contents:write on the target repository.",
        )?;
        let github_user = required(raw.github_user, "GithubUser", "Repository owner.")?;
        let github_repo = required(raw.github_repo, "GithubRepo", "Repository name.")?;
        let mailgun_token = required(
            raw.mailgun_token,
            "MailgunToken",
            "API key used to download attachments from the relay.",
        )?;

        // Posts may live at the repository root, so Path is allowed to be empty.
        let path = raw
            .path
            .unwrap_or_default()
            .trim_matches('/')
            .to_string();

        let assets_path = match raw.assets_path {
            Some(p) => p.trim_matches('/').to_string(),
            None if path.is_empty() => "assets".to_string(),
            None => format!("{path}/assets"),
        };
        if assets_path.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "AssetsPath".into(),
                message: "must not be the repository root".into(),
            });
        }

        let branch = raw.branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string());
        if branch.is_empty() || branch.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidValue {
                key: "Branch".into(),
                message: format!("'{branch}' is not a valid branch name"),
            });
        }

        let listen_str = raw.listen.unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen: SocketAddr = listen_str.parse().map_err(|e| ConfigError::InvalidValue {
            key: "Listen".into(),
            message: format!("{listen_str}: {e}"),
        })?;

        let timeout_secs = raw.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TimeoutSecs".into(),
                message: "must be at least 1".into(),
            });
        }

        let read_attempts = raw.read_attempts.unwrap_or(DEFAULT_READ_ATTEMPTS);
        if read_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "ReadAttempts".into(),
                message: "must be at least 1".into(),
            });
        }

        if raw.authors.is_empty() {
            tracing::warn!("No authors configured; every email will be rejected");
        }

        Ok(Self {
            github_token: SecretString::from(github_token),
            github_user,
            github_repo,
            branch,
            path,
            assets_path,
            mailgun_token: SecretString::from(mailgun_token),
            authors: raw.authors,
            api_base: raw
                .api_base
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            listen,
            timeout: Duration::from_secs(timeout_secs),
            read_attempts,
            commit_message: raw
                .commit_message
                .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string()),
        })
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config::from_json(
        r#"{
            "GithubToken": "ghp_test",
            "GithubUser": "octocat",
            "GithubRepo": "blog",
            "Path": "content/posts",
            "MailgunToken": "key-test",
            "Authors": { "ada@example.com": "Ada" }
        }"#,
    )
    .unwrap()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = test_config();
        assert_eq!(config.github_user, "octocat");
        assert_eq!(config.github_repo, "blog");
        assert_eq!(config.path, "content/posts");
        assert_eq!(config.assets_path, "content/posts/assets");
        assert_eq!(config.branch, "main");
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.listen.port(), 5555);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.read_attempts, 2);
        assert_eq!(config.commit_message, "Automatic Publish");
        assert_eq!(config.github_token.expose_secret(), "ghp_test");
        assert_eq!(config.authors["ada@example.com"], "Ada");
        assert_eq!(config.authors.len(), 1);
    }

    #[test]
    fn overrides_are_applied() {
        let config = Config::from_json(
            r#"{
                "GithubToken": "t",
                "GithubUser": "u",
                "GithubRepo": "r",
                "Path": "/posts/",
                "MailgunToken": "m",
                "Authors": {},
                "Branch": "gh-pages",
                "AssetsPath": "static/img/",
                "ApiBase": "https://github.example.com/api/v3/",
                "Listen": "127.0.0.1:8080",
                "TimeoutSecs": 5,
                "ReadAttempts": 3,
                "CommitMessage": "Publish from email"
            }"#,
        )
        .unwrap();
        assert_eq!(config.path, "posts");
        assert_eq!(config.assets_path, "static/img");
        assert_eq!(config.branch, "gh-pages");
        assert_eq!(config.api_base, "https://github.example.com/api/v3");
        assert_eq!(config.listen.port(), 8080);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.read_attempts, 3);
        assert_eq!(config.commit_message, "Publish from email");
    }

    #[test]
    fn root_path_puts_assets_at_top_level() {
        let config = Config::from_json(
            r#"{"GithubToken":"t","GithubUser":"u","GithubRepo":"r","MailgunToken":"m"}"#,
        )
        .unwrap();
        assert_eq!(config.path, "");
        assert_eq!(config.assets_path, "assets");
    }

    #[test]
    fn missing_token_is_rejected() {
        let err = Config::from_json(r#"{"GithubUser":"u","GithubRepo":"r","MailgunToken":"m"}"#)
            .unwrap_err();
        match err {
            ConfigError::MissingRequired { key, .. } => assert_eq!(key, "GithubToken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Config::from_json(
            r#"{"GithubToken":"t","GithubUser":"u","GithubRepo":"r","MailgunToken":"m","Colour":"x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            Config::from_json("{not json"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn invalid_listen_address() {
        let err = Config::from_json(
            r#"{"GithubToken":"t","GithubUser":"u","GithubRepo":"r","MailgunToken":"m","Listen":"nope"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "Listen"));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let err = Config::from_json(
            r#"{"GithubToken":"t","GithubUser":"u","GithubRepo":"r","MailgunToken":"m","TimeoutSecs":0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "TimeoutSecs"));
    }

    #[test]
    fn debug_does_not_expose_secrets() {
        let config = test_config();
        let debug = format!("{config:?}");
        assert!(!debug.contains("ghp_test"));
        assert!(!debug.contains("key-test"));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"GithubToken":"t","GithubUser":"u","GithubRepo":"r","Path":"p","MailgunToken":"m"}}"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.path, "p");
    }

    #[test]
    fn load_missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(dir.path().join("conf.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
