//! The version-control interface the snapshot sequence runs against.

use crate::error::Result;
use std::path::Path;

/// Narrow interface over a version-control work tree.
///
/// Every method maps to a single operation so that failures can be
/// injected at any step of the snapshot sequence (see [`crate::MockVcs`]).
pub trait VersionControl: Send + Sync {
    /// Root directory of the work tree.
    fn repo_root(&self) -> &Path;

    /// Name of the branch HEAD points at.
    fn current_branch(&self) -> Result<String>;

    /// Fetch URL of the named remote.
    fn remote_url(&self, remote: &str) -> Result<String>;

    /// Detach HEAD at its current commit, keeping the working tree.
    fn detach(&self) -> Result<()>;

    /// Stage everything and commit it.
    ///
    /// Returns `None` when there was nothing to commit.
    fn commit_all(&self, message: &str) -> Result<Option<String>>;

    /// Commit hash HEAD currently resolves to.
    fn head_commit(&self) -> Result<String>;

    /// Create `tag` at `commit` and push it to `remote`.
    fn tag_and_push(&self, tag: &str, commit: &str, remote: &str) -> Result<()>;

    /// Push `branch` to `remote`.
    fn push_branch(&self, branch: &str, remote: &str) -> Result<()>;

    /// Drop the last commit from HEAD, leaving its changes in the working tree.
    fn untrack_last_commit(&self) -> Result<()>;

    /// Check out `branch` again.
    fn restore(&self, branch: &str) -> Result<()>;
}
