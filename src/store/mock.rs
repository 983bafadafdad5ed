//! In-memory content store for deterministic testing.
//!
//! Models just enough of a git repository to check publish invariants:
//! branches point at commits, every commit holds a full snapshot of the tree,
//! and merges fast-forward or combine non-overlapping changes.
//!
//! # Example
//!
//! ```
//! use mailpress::store::{ContentStore, MockStore, PutFileRequest};
//!
//! # tokio_test::block_on(async {
//! let store = MockStore::with_branch("main");
//! let head = store.branch_head("main").await.unwrap();
//! store.create_branch("work", &head).await.unwrap();
//! store
//!     .put_file(PutFileRequest {
//!         path: "posts/a.md".into(),
//!         content: b"hi".to_vec(),
//!         message: "add".into(),
//!         branch: "work".into(),
//!     })
//!     .await
//!     .unwrap();
//! assert_eq!(store.file("work", "posts/a.md").unwrap(), b"hi");
//! assert!(store.file("main", "posts/a.md").is_none());
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::traits::{ContentStore, FileCommit, MergeOutcome, PutFileRequest};
use crate::error::StoreError;

type Tree = BTreeMap<String, Vec<u8>>;

/// Mock store. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<Mutex<MockStoreInner>>,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    branches: HashMap<String, String>,
    commits: HashMap<String, Commit>,
    next_commit: u64,
    failures: Vec<FailOn>,
    operations: Vec<MockOperation>,
}

#[derive(Debug, Clone)]
struct Commit {
    parents: Vec<String>,
    tree: Tree,
}

/// Which operation should fail, and with what.
#[derive(Debug, Clone)]
pub enum FailOn {
    BranchHead(StoreError),
    CreateBranch(StoreError),
    /// Fail writes whose path contains the given fragment.
    PutFile { path_contains: String, error: StoreError },
    Merge(StoreError),
    DeleteBranch(StoreError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    BranchHead { branch: String },
    CreateBranch { name: String, sha: String },
    PutFile { path: String, branch: String },
    Merge { base: String, head: String },
    DeleteBranch { name: String },
}

impl MockStore {
    /// Empty store with no branches.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with one branch holding a single empty root commit.
    pub fn with_branch(branch: &str) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.lock().unwrap();
            let root = inner.commit(Vec::new(), Tree::new());
            inner.branches.insert(branch.to_string(), root);
        }
        store
    }

    /// Add a failure rule. Rules stay active until cleared.
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.inner.lock().unwrap().failures.push(fail_on);
        self
    }

    /// Remove all failure rules.
    pub fn clear_failures(&self) {
        self.inner.lock().unwrap().failures.clear();
    }

    /// All recorded operations, in call order.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Current head commit of a branch.
    pub fn head_of(&self, branch: &str) -> Option<String> {
        self.inner.lock().unwrap().branches.get(branch).cloned()
    }

    /// Names of all branches, sorted.
    pub fn branches(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let mut names: Vec<String> = inner.branches.keys().cloned().collect();
        names.sort();
        names
    }

    /// Content of a file at the head of a branch.
    pub fn file(&self, branch: &str, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        let head = inner.branches.get(branch)?;
        inner.commits.get(head)?.tree.get(path).cloned()
    }

    /// Paths of all files at the head of a branch, sorted.
    pub fn files(&self, branch: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .branches
            .get(branch)
            .and_then(|head| inner.commits.get(head))
            .map(|c| c.tree.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Commit a file straight onto a branch, bypassing recording and failure
    /// rules. Simulates someone else pushing.
    pub fn commit_directly(&self, branch: &str, path: &str, content: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        let Some(head) = inner.branches.get(branch).cloned() else {
            return;
        };
        let mut tree = inner.commits[&head].tree.clone();
        tree.insert(path.to_string(), content.to_vec());
        let sha = inner.commit(vec![head], tree);
        inner.branches.insert(branch.to_string(), sha);
    }

    fn record(&self, op: MockOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    fn check_fail(&self, op: &MockOperation) -> Result<(), StoreError> {
        let inner = self.inner.lock().unwrap();
        for rule in &inner.failures {
            let hit = match (rule, op) {
                (FailOn::BranchHead(e), MockOperation::BranchHead { .. })
                | (FailOn::CreateBranch(e), MockOperation::CreateBranch { .. })
                | (FailOn::Merge(e), MockOperation::Merge { .. })
                | (FailOn::DeleteBranch(e), MockOperation::DeleteBranch { .. }) => Some(e),
                (
                    FailOn::PutFile {
                        path_contains,
                        error,
                    },
                    MockOperation::PutFile { path, .. },
                ) if path.contains(path_contains.as_str()) => Some(error),
                _ => None,
            };
            if let Some(err) = hit {
                return Err(err.clone());
            }
        }
        Ok(())
    }
}

impl MockStoreInner {
    fn commit(&mut self, parents: Vec<String>, tree: Tree) -> String {
        self.next_commit += 1;
        let sha = format!("{:040x}", self.next_commit);
        self.commits.insert(sha.clone(), Commit { parents, tree });
        sha
    }

    fn ancestors(&self, sha: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack = vec![sha.to_string()];
        while let Some(current) = stack.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&current) {
                stack.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    /// Nearest common ancestor, by walking `b`'s history breadth-first.
    fn merge_base(&self, a: &str, b: &str) -> Option<String> {
        let ours = self.ancestors(a);
        let mut queue = std::collections::VecDeque::from([b.to_string()]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if ours.contains(&current) {
                return Some(current);
            }
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(commit) = self.commits.get(&current) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        None
    }
}

#[async_trait]
impl ContentStore for MockStore {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn branch_head(&self, branch: &str) -> Result<String, StoreError> {
        let op = MockOperation::BranchHead {
            branch: branch.to_string(),
        };
        self.record(op.clone());
        self.check_fail(&op)?;

        self.head_of(branch)
            .ok_or_else(|| StoreError::NotFound(format!("branch {branch}")))
    }

    async fn create_branch(&self, name: &str, sha: &str) -> Result<(), StoreError> {
        let op = MockOperation::CreateBranch {
            name: name.to_string(),
            sha: sha.to_string(),
        };
        self.record(op.clone());
        self.check_fail(&op)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.branches.contains_key(name) {
            return Err(StoreError::Api {
                status: 422,
                message: "Reference already exists".into(),
            });
        }
        if !inner.commits.contains_key(sha) {
            return Err(StoreError::Api {
                status: 422,
                message: "Object does not exist".into(),
            });
        }
        inner.branches.insert(name.to_string(), sha.to_string());
        Ok(())
    }

    async fn put_file(&self, request: PutFileRequest) -> Result<FileCommit, StoreError> {
        let op = MockOperation::PutFile {
            path: request.path.clone(),
            branch: request.branch.clone(),
        };
        self.record(op.clone());
        self.check_fail(&op)?;

        let mut inner = self.inner.lock().unwrap();
        let head = inner
            .branches
            .get(&request.branch)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("branch {}", request.branch)))?;
        let mut tree = inner.commits[&head].tree.clone();
        tree.insert(request.path.clone(), request.content);
        let sha = inner.commit(vec![head], tree);
        inner.branches.insert(request.branch, sha.clone());

        Ok(FileCommit {
            path: request.path,
            commit_sha: sha,
        })
    }

    async fn merge(
        &self,
        base: &str,
        head: &str,
        _message: &str,
    ) -> Result<MergeOutcome, StoreError> {
        let op = MockOperation::Merge {
            base: base.to_string(),
            head: head.to_string(),
        };
        self.record(op.clone());
        self.check_fail(&op)?;

        let mut inner = self.inner.lock().unwrap();
        let base_sha = inner
            .branches
            .get(base)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Base does not exist: {base}")))?;
        let head_sha = inner
            .branches
            .get(head)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("Head does not exist: {head}")))?;

        if inner.ancestors(&base_sha).contains(&head_sha) {
            return Ok(MergeOutcome::UpToDate);
        }

        let empty = Tree::new();
        let ancestor = inner.merge_base(&base_sha, &head_sha);
        let ancestor_tree = ancestor
            .as_ref()
            .map_or(&empty, |sha| &inner.commits[sha].tree);
        let base_tree = &inner.commits[&base_sha].tree;
        let head_tree = &inner.commits[&head_sha].tree;

        let mut merged = base_tree.clone();
        for (path, content) in head_tree {
            let theirs_changed = ancestor_tree.get(path) != Some(content);
            if !theirs_changed {
                continue;
            }
            let ours_changed = ancestor_tree.get(path) != base_tree.get(path);
            if ours_changed && base_tree.get(path) != Some(content) {
                return Err(StoreError::Conflict("Merge conflict".into()));
            }
            merged.insert(path.clone(), content.clone());
        }

        let sha = inner.commit(vec![base_sha, head_sha], merged);
        inner.branches.insert(base.to_string(), sha.clone());
        Ok(MergeOutcome::Merged { sha })
    }

    async fn delete_branch(&self, name: &str) -> Result<(), StoreError> {
        let op = MockOperation::DeleteBranch {
            name: name.to_string(),
        };
        self.record(op.clone());
        self.check_fail(&op)?;

        self.inner
            .lock()
            .unwrap()
            .branches
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::Api {
                status: 422,
                message: "Reference does not exist".into(),
            })
    }
}
