//! Publish transaction manager.
//!
//! A post is never written straight to the primary branch. Each publish
//! works on its own branch named by a [`StampId`], writes the attachment
//! files and then the post file there, and only then merges into the
//! primary branch in a single step:
//!
//! ```text
//! Started ──► BranchCreated ──► FilesWritten ──► Merged
//!    │              │                 │             │
//!    └──────────────┴─────────────────┴──► Failed   └─► working branch deleted
//! ```
//!
//! A failure before the merge leaves the primary branch exactly where it was.
//! A failed merge keeps the working branch around so the post can be
//! recovered by hand.

mod stamp;
mod transaction;

pub use stamp::StampId;
pub use transaction::{FileKind, FileWrite, Layout, PublishReport, Publisher, TxState};
