//! Post model and renderer.
//!
//! A rendered post is a pretty-printed JSON preamble followed by a newline and
//! the raw body:
//!
//! ```text
//! {
//!   "Date": "2026-10-16T14:30:00Z",
//!   "Title": "v1.0 shipped",
//!   "Author": "Ada",
//!   "Tags": [
//!     "go",
//!     "releases"
//!   ]
//! }
//! See notes.
//! ```
//!
//! Attachments are never inlined. They are stored as separate files and the
//! body gets one image link per stored asset, relative to the post's
//! directory.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::intake::ParsedEmail;

/// Minute-granularity timestamp format used in filenames and branch names.
pub const STAMP_FORMAT: &str = "%Y-%m-%d-%H%M";

/// A post to be published. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub author: String,
    pub tags: Vec<String>,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    /// Attachment filename → raw bytes.
    pub attachments: HashMap<String, Vec<u8>>,
}

impl Post {
    /// Build a post from a parsed email and the fetched attachment bytes.
    pub fn from_email(
        email: ParsedEmail,
        attachments: HashMap<String, Vec<u8>>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            title: email.title,
            author: email.author,
            tags: email.tags,
            body: email.body,
            timestamp,
            attachments,
        }
    }

    /// Repository path of the post file under `dir`.
    pub fn path_in(&self, dir: &str) -> String {
        post_path(dir, &self.timestamp, &self.title)
    }

    /// Render the document with links to the given stored assets.
    ///
    /// `assets` are `(display name, repository path)` pairs; `post_dir` is
    /// the directory the post file lives in.
    pub fn render(&self, post_dir: &str, assets: &[(String, String)]) -> serde_json::Result<String> {
        let preamble = Preamble {
            date: &self.timestamp,
            title: &self.title,
            author: &self.author,
            tags: &self.tags,
        };
        let mut doc = serde_json::to_string_pretty(&preamble)?;
        doc.push('\n');
        doc.push_str(&self.body);
        for (name, path) in assets {
            doc.push_str(&format!("\n\n![{}]({})", name, relative_link(post_dir, path)));
        }
        Ok(doc)
    }
}

/// Front-matter block. Field order is the serialized key order.
#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Preamble<'a> {
    date: &'a DateTime<Utc>,
    title: &'a str,
    author: &'a str,
    tags: &'a [String],
}

/// Title → filename slug. Spaces and path separators become dashes so the
/// post always lands directly in its directory.
pub fn slugify(title: &str) -> String {
    title.replace([' ', '/', '\\'], "-")
}

/// `<dir>/<YYYY-MM-DD-HHMM>-<slug>.md`, or without the directory when `dir`
/// is the repository root.
pub fn post_path(dir: &str, timestamp: &DateTime<Utc>, title: &str) -> String {
    let file = format!("{}-{}.md", timestamp.format(STAMP_FORMAT), slugify(title));
    join(dir, &file)
}

/// Make an attachment name safe to use as a single path segment.
pub fn asset_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_whitespace() || c.is_control() {
                '-'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Make `file` unique among `taken` by adding `-2`, `-3`, ... before the
/// extension, then record it as taken.
pub fn claim_file_name(file: &str, taken: &mut HashSet<String>) -> String {
    if taken.insert(file.to_string()) {
        return file.to_string();
    }
    let (stem, ext) = match file.rfind('.') {
        Some(i) if i > 0 => file.split_at(i),
        _ => (file, ""),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{stem}-{n}{ext}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// `<assets_dir>/<stamp>-<safe name>`.
pub fn asset_path(assets_dir: &str, stamp: &str, name: &str) -> String {
    join(assets_dir, &format!("{stamp}-{}", asset_file_name(name)))
}

/// Relative link from a directory to a file, both repository paths.
///
/// `relative_link("content/posts", "content/posts/assets/a.png")` →
/// `assets/a.png`; `relative_link("posts", "static/a.png")` →
/// `../static/a.png`.
pub fn relative_link(from_dir: &str, to_path: &str) -> String {
    let from: Vec<&str> = from_dir.split('/').filter(|s| !s.is_empty()).collect();
    let to: Vec<&str> = to_path.split('/').filter(|s| !s.is_empty()).collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut parts: Vec<&str> = std::iter::repeat_n("..", from.len() - common).collect();
    parts.extend(&to[common..]);
    parts.join("/")
}

fn join(dir: &str, file: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        file.to_string()
    } else {
        format!("{dir}/{file}")
    }
}
