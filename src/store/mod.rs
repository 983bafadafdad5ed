//! Remote content store: the version-controlled repository posts land in.
//!
//! Publishing only needs five operations (read a branch head, create a
//! branch, write a file on a branch, merge, delete a branch), captured by
//! the [`ContentStore`] trait. [`github::GitHubStore`] talks to the GitHub
//! REST API; [`mock::MockStore`] is an in-memory repository for tests.

pub mod github;
pub mod mock;
mod traits;

pub use github::GitHubStore;
pub use mock::MockStore;
pub use traits::*;
