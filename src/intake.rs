//! Email intake: turns relay webhook form fields into a post skeleton.
//!
//! Pure parsing: no network calls happen here, so an email from an unknown
//! sender is rejected before anything touches the content store.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::IntakeError;

/// Leading `[tag1,tag2]` block on a subject line.
static TAGS_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[([^\]]+)\]").unwrap());

/// Raw webhook form as posted by the mail relay.
///
/// Every field defaults to empty, matching how the relay omits fields it has
/// nothing to say about.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WebhookForm {
    #[serde(rename = "body-plain", default)]
    pub body_plain: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub subject: String,
    /// JSON array of [`AttachmentDescriptor`], as a string.
    #[serde(default)]
    pub attachments: String,
}

/// One attachment as announced by the relay. The bytes live behind `url`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttachmentDescriptor {
    pub url: String,
    #[serde(rename = "content-type")]
    pub content_type: String,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

/// A parsed email, ready for attachment fetching and publishing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    pub author: String,
    pub title: String,
    pub tags: Vec<String>,
    pub body: String,
    pub attachments: Vec<AttachmentDescriptor>,
}

/// Split a subject into `(tags, title)`.
///
/// `[go,releases] v1.0 shipped` → `(["go", "releases"], "v1.0 shipped")`.
/// Tags are not trimmed individually. Without a bracket prefix the subject is
/// returned unchanged with no tags.
pub fn parse_subject(subject: &str) -> (Vec<String>, String) {
    match TAGS_PREFIX.captures(subject) {
        Some(caps) => {
            let whole = caps.get(0).map_or(0, |m| m.end());
            let tags = caps
                .get(1)
                .map(|m| m.as_str().split(',').map(str::to_string).collect())
                .unwrap_or_default();
            (tags, subject[whole..].trim().to_string())
        }
        None => (Vec::new(), subject.to_string()),
    }
}

/// Decode the `attachments` form field.
///
/// An empty field means no attachments. A malformed one is logged and
/// treated the same way; the email itself is still published.
pub fn parse_attachments(raw: &str) -> Vec<AttachmentDescriptor> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Vec<AttachmentDescriptor>>(raw) {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed attachments field");
            Vec::new()
        }
    }
}

/// Parse a webhook form, resolving the sender against the author map.
pub fn parse_email(
    form: &WebhookForm,
    authors: &HashMap<String, String>,
) -> Result<ParsedEmail, IntakeError> {
    let author = authors
        .get(&form.sender)
        .cloned()
        .ok_or_else(|| IntakeError::UnknownSender {
            sender: form.sender.clone(),
        })?;

    let (tags, title) = parse_subject(&form.subject);

    Ok(ParsedEmail {
        author,
        title,
        tags,
        body: form.body_plain.clone(),
        attachments: parse_attachments(&form.attachments),
    })
}
