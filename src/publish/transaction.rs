use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::stamp::StampId;
use crate::config::Config;
use crate::error::{PublishError, StoreError, WriteError};
use crate::post::{Post, asset_file_name, asset_path, claim_file_name};
use crate::store::{ContentStore, FileCommit, MergeOutcome, PutFileRequest};

/// Where things go in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub primary_branch: String,
    pub post_dir: String,
    pub assets_dir: String,
    pub commit_message: String,
}

impl Layout {
    pub fn from_config(config: &Config) -> Self {
        Self {
            primary_branch: config.branch.clone(),
            post_dir: config.path.clone(),
            assets_dir: config.assets_path.clone(),
            commit_message: config.commit_message.clone(),
        }
    }
}

/// Transaction lifecycle. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxState {
    Started,
    BranchCreated,
    FilesWritten,
    Merged,
    Failed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::BranchCreated => "branch_created",
            Self::FilesWritten => "files_written",
            Self::Merged => "merged",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    Attachment { name: String },
    Post,
}

/// Outcome of one file write on the working branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub kind: FileKind,
    pub result: Result<FileCommit, WriteError>,
}

impl FileWrite {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub stamp: StampId,
    pub branch: String,
    /// Primary branch name.
    pub base: String,
    /// Primary branch head the working branch was forked from.
    pub base_sha: String,
    pub post_path: String,
    /// Every write attempted, attachments first, post last.
    pub files: Vec<FileWrite>,
    pub merge_sha: String,
    /// False when the merge landed but the working branch could not be removed.
    pub branch_deleted: bool,
}

impl PublishReport {
    /// Attachments that were dropped because their write failed.
    pub fn failed_attachments(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| !f.is_ok())
            .filter_map(|f| match &f.kind {
                FileKind::Attachment { name } => Some(name.as_str()),
                FileKind::Post => None,
            })
            .collect()
    }
}

/// Runs publish transactions against a content store.
pub struct Publisher {
    store: Arc<dyn ContentStore>,
    layout: Layout,
}

impl Publisher {
    pub fn new(store: Arc<dyn ContentStore>, layout: Layout) -> Self {
        Self { store, layout }
    }

    /// Publish a post under a fresh [`StampId`].
    pub async fn publish(&self, post: &Post) -> Result<PublishReport, PublishError> {
        self.publish_with_stamp(post, StampId::new(&post.timestamp))
            .await
    }

    /// Publish a post under a caller-chosen stamp.
    ///
    /// The stamp names the working branch, so reusing one that already
    /// exists fails at branch creation.
    pub async fn publish_with_stamp(
        &self,
        post: &Post,
        stamp: StampId,
    ) -> Result<PublishReport, PublishError> {
        let mut tx = PublishTransaction::new(self.store.as_ref(), &self.layout, stamp);
        let result = tx.run(post).await;
        if let Err(e) = &result {
            tx.advance(TxState::Failed);
            match e.retained_branch() {
                Some(branch) => error!(
                    stamp = %tx.stamp,
                    branch = %branch,
                    base_sha = tx.base_sha.as_deref().unwrap_or_default(),
                    error = %e,
                    "Publish failed, working branch retained"
                ),
                None => error!(stamp = %tx.stamp, error = %e, "Publish failed"),
            }
        }
        result
    }
}

struct PublishTransaction<'a> {
    store: &'a dyn ContentStore,
    layout: &'a Layout,
    stamp: StampId,
    branch: String,
    /// Head of the primary branch when the transaction started.
    base_sha: Option<String>,
    state: TxState,
    files: Vec<FileWrite>,
}

impl<'a> PublishTransaction<'a> {
    fn new(store: &'a dyn ContentStore, layout: &'a Layout, stamp: StampId) -> Self {
        let branch = stamp.to_string();
        Self {
            store,
            layout,
            stamp,
            branch,
            base_sha: None,
            state: TxState::Started,
            files: Vec::new(),
        }
    }

    fn advance(&mut self, next: TxState) {
        debug_assert!(next > self.state, "{} -> {}", self.state, next);
        debug!(stamp = %self.stamp, from = %self.state, to = %next, "Transaction state");
        self.state = next;
    }

    async fn run(&mut self, post: &Post) -> Result<PublishReport, PublishError> {
        let base = self.layout.primary_branch.clone();
        info!(
            stamp = %self.stamp,
            store = self.store.name(),
            base = %base,
            title = %post.title,
            attachments = post.attachments.len(),
            "Publish started"
        );

        // ── Branch ───────────────────────────────────────────────
        let head = self
            .store
            .branch_head(&base)
            .await
            .map_err(|source| PublishError::HeadLookup {
                branch: base.clone(),
                source,
            })?;

        self.store
            .create_branch(&self.branch, &head)
            .await
            .map_err(|source| PublishError::BranchCreate {
                branch: self.branch.clone(),
                source,
            })?;
        debug!(stamp = %self.stamp, branch = %self.branch, base_sha = %head, "Working branch created");
        self.base_sha = Some(head.clone());
        self.advance(TxState::BranchCreated);

        // ── Files ────────────────────────────────────────────────
        // Sequential: each write moves the branch head, so parallel writes
        // to one branch would race.
        let stored = self.write_attachments(post).await;

        let doc = post
            .render(&self.layout.post_dir, &stored)
            .map_err(|e| PublishError::Render {
                branch: self.branch.clone(),
                reason: e.to_string(),
            })?;

        let post_path = post.path_in(&self.layout.post_dir);
        let result = self.write(&post_path, doc.into_bytes()).await;
        let post_result = result.clone();
        self.files.push(FileWrite {
            path: post_path.clone(),
            kind: FileKind::Post,
            result,
        });
        post_result.map_err(|source| PublishError::PostWrite {
            branch: self.branch.clone(),
            source,
        })?;
        self.advance(TxState::FilesWritten);

        // ── Merge ────────────────────────────────────────────────
        let merge_sha = match self
            .store
            .merge(&base, &self.branch, &self.layout.commit_message)
            .await
        {
            Ok(MergeOutcome::Merged { sha }) => sha,
            Ok(MergeOutcome::UpToDate) => {
                return Err(PublishError::NothingToMerge {
                    branch: self.branch.clone(),
                    base,
                });
            }
            Err(source) => {
                return Err(PublishError::Merge {
                    branch: self.branch.clone(),
                    base,
                    source,
                });
            }
        };
        self.advance(TxState::Merged);

        let branch_deleted = match self.store.delete_branch(&self.branch).await {
            Ok(()) => true,
            Err(e) => {
                warn!(branch = %self.branch, error = %e, "Failed to delete merged working branch");
                false
            }
        };

        info!(
            stamp = %self.stamp,
            path = %post_path,
            sha = %merge_sha,
            "Post published"
        );

        Ok(PublishReport {
            stamp: self.stamp.clone(),
            branch: self.branch.clone(),
            base,
            base_sha: head,
            post_path,
            files: std::mem::take(&mut self.files),
            merge_sha,
            branch_deleted,
        })
    }

    /// Write every attachment, returning `(name, path)` for the ones stored.
    async fn write_attachments(&mut self, post: &Post) -> Vec<(String, String)> {
        let mut names: Vec<&String> = post.attachments.keys().collect();
        names.sort();

        // Distinct names can clean up to the same file name.
        let mut taken = HashSet::new();
        let mut stored = Vec::new();
        for name in names {
            let file = claim_file_name(&asset_file_name(name), &mut taken);
            let path = asset_path(&self.layout.assets_dir, self.stamp.as_str(), &file);
            let result = self.write(&path, post.attachments[name].clone()).await;
            match &result {
                Ok(_) => stored.push((name.clone(), path.clone())),
                Err(e) => warn!(
                    stamp = %self.stamp,
                    name = %name,
                    error = %e,
                    "Attachment write failed, publishing without it"
                ),
            }
            self.files.push(FileWrite {
                path,
                kind: FileKind::Attachment { name: name.clone() },
                result,
            });
        }
        stored
    }

    async fn write(&self, path: &str, content: Vec<u8>) -> Result<FileCommit, WriteError> {
        let request = PutFileRequest {
            path: path.to_string(),
            content,
            message: self.layout.commit_message.clone(),
            branch: self.branch.clone(),
        };
        let commit = self
            .store
            .put_file(request)
            .await
            .map_err(|source: StoreError| WriteError {
                path: path.to_string(),
                source,
            })?;
        debug!(branch = %self.branch, path, sha = %commit.commit_sha, "File written");
        Ok(commit)
    }
}
