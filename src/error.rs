//! Error types for mailpress.

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Errors turning a webhook payload into a post skeleton.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntakeError {
    #[error("Unknown Sender")]
    UnknownSender { sender: String },

    #[error("Malformed webhook form: {0}")]
    MalformedForm(String),
}

/// A single attachment could not be retrieved. Never fatal to the publish.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("Unrecognized content type {content_type} for {name}")]
    UnsupportedType { name: String, content_type: String },

    #[error("Request for {name} failed: {reason}")]
    Request { name: String, reason: String },

    #[error("Unexpected status {status} for {name}")]
    Status { name: String, status: u16 },

    #[error("Failed to read body of {name}: {reason}")]
    Body { name: String, reason: String },
}

/// Errors from the remote content store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("rate limited")]
    RateLimited,

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// A file write that failed on the working branch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("write of {path} failed: {source}")]
pub struct WriteError {
    pub path: String,
    #[source]
    pub source: StoreError,
}

/// Terminal failure of a publish transaction.
///
/// Only [`PublishError::HeadLookup`] and [`PublishError::BranchCreate`] leave
/// nothing behind; every later failure keeps the working branch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("Failed to read head of {branch}: {source}")]
    HeadLookup {
        branch: String,
        #[source]
        source: StoreError,
    },

    #[error("Failed to create working branch {branch}: {source}")]
    BranchCreate {
        branch: String,
        #[source]
        source: StoreError,
    },

    #[error("Post write failed, working branch {branch} retained: {source}")]
    PostWrite {
        branch: String,
        #[source]
        source: WriteError,
    },

    #[error("Failed to merge {branch} into {base}, working branch retained: {source}")]
    Merge {
        branch: String,
        base: String,
        #[source]
        source: StoreError,
    },

    #[error("Merge of {branch} into {base} changed nothing, working branch retained")]
    NothingToMerge { branch: String, base: String },

    #[error("Failed to render post, working branch {branch} retained: {reason}")]
    Render { branch: String, reason: String },
}

impl PublishError {
    /// Working branch left in the store by this failure, if any.
    pub fn retained_branch(&self) -> Option<&str> {
        match self {
            Self::HeadLookup { .. } | Self::BranchCreate { .. } => None,
            Self::PostWrite { branch, .. }
            | Self::Merge { branch, .. }
            | Self::NothingToMerge { branch, .. }
            | Self::Render { branch, .. } => Some(branch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_sender_display_matches_webhook_body() {
        let err = IntakeError::UnknownSender {
            sender: "mallory@example.com".into(),
        };
        assert_eq!(err.to_string(), "Unknown Sender");
    }

    #[test]
    fn store_error_display() {
        assert_eq!(
            StoreError::Api {
                status: 422,
                message: "Reference already exists".into()
            }
            .to_string(),
            "API error: 422 - Reference already exists"
        );
        assert_eq!(StoreError::RateLimited.to_string(), "rate limited");
        assert_eq!(
            StoreError::Conflict("Merge conflict".into()).to_string(),
            "conflict: Merge conflict"
        );
    }

    #[test]
    fn merge_error_names_retained_branch() {
        let err = PublishError::Merge {
            branch: "2026-10-16-1430-0a1b2c3d".into(),
            base: "main".into(),
            source: StoreError::Conflict("Merge conflict".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("2026-10-16-1430-0a1b2c3d"));
        assert!(msg.contains("retained"));
        assert_eq!(err.retained_branch(), Some("2026-10-16-1430-0a1b2c3d"));
    }

    #[test]
    fn early_failures_retain_nothing() {
        let err = PublishError::HeadLookup {
            branch: "main".into(),
            source: StoreError::NotFound("Not Found".into()),
        };
        assert_eq!(err.retained_branch(), None);
    }

    #[test]
    fn render_failure_retains_branch() {
        let err = PublishError::Render {
            branch: "b".into(),
            reason: "bad".into(),
        };
        assert_eq!(err.retained_branch(), Some("b"));
    }
}
