//! `ContentStore` trait and its request/response types.

use async_trait::async_trait;

use crate::error::StoreError;

/// Request to create or overwrite a file on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutFileRequest {
    /// Repository path, without a leading slash.
    pub path: String,
    /// Raw file content.
    pub content: Vec<u8>,
    /// Commit message for the write.
    pub message: String,
    /// Branch the commit lands on.
    pub branch: String,
}

/// Result of a successful file write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCommit {
    pub path: String,
    /// SHA of the commit created by the write.
    pub commit_sha: String,
}

/// Result of merging one branch into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// A merge commit was created on the base branch.
    Merged { sha: String },
    /// The base branch already contains the head; nothing changed.
    UpToDate,
}

/// Backend-agnostic interface to the remote repository.
///
/// Implementations must be `Send + Sync`: one store instance is shared by
/// every request handler.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store name for logs (e.g. "github").
    fn name(&self) -> &'static str;

    /// SHA of the commit `branch` currently points at.
    ///
    /// This is the only idempotent read, and the only call implementations
    /// may retry.
    async fn branch_head(&self, branch: &str) -> Result<String, StoreError>;

    /// Create branch `name` pointing at commit `sha`.
    async fn create_branch(&self, name: &str, sha: &str) -> Result<(), StoreError>;

    /// Create or overwrite a file on a branch.
    async fn put_file(&self, request: PutFileRequest) -> Result<FileCommit, StoreError>;

    /// Merge `head` into `base`.
    async fn merge(
        &self,
        base: &str,
        head: &str,
        message: &str,
    ) -> Result<MergeOutcome, StoreError>;

    /// Delete branch `name`.
    async fn delete_branch(&self, name: &str) -> Result<(), StoreError>;
}
