//! In-memory version control for tests.

use crate::error::{Error, Result};
use crate::vcs::VersionControl;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// A step of the snapshot sequence that [`MockVcs`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// `remote_url`
    RemoteUrl,
    /// `detach`
    Detach,
    /// `commit_all`
    Commit,
    /// `head_commit`
    HeadCommit,
    /// `tag_and_push`
    TagAndPush,
    /// `push_branch`
    PushBranch,
    /// `untrack_last_commit`
    Untrack,
    /// `restore`
    Restore,
}

impl Step {
    /// Every step, in sequence order.
    pub const ALL: [Step; 8] = [
        Step::RemoteUrl,
        Step::Detach,
        Step::Commit,
        Step::HeadCommit,
        Step::TagAndPush,
        Step::PushBranch,
        Step::Untrack,
        Step::Restore,
    ];
}

#[derive(Debug)]
struct State {
    checked_out: Option<String>,
    head: String,
    history: Vec<String>,
    dirty: bool,
    remote_url: String,
    fail_at: Option<Step>,
    tags: Vec<(String, String)>,
    pushed_branches: Vec<String>,
    calls: Vec<String>,
    next_commit: u32,
}

/// In-memory work tree with failure injection.
///
/// Clones share state, so a test can keep a handle while the code under
/// test owns another.
#[derive(Debug, Clone)]
pub struct MockVcs {
    root: PathBuf,
    state: Arc<Mutex<State>>,
}

impl MockVcs {
    /// A clean work tree on `branch` with an SSH remote.
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            root: PathBuf::from("/work/project"),
            state: Arc::new(Mutex::new(State {
                checked_out: Some(branch.into()),
                head: "0000000000000000000000000000000000000000".to_string(),
                history: Vec::new(),
                dirty: false,
                remote_url: "git@github.com:lab/project.git".to_string(),
                fail_at: None,
                tags: Vec::new(),
                pushed_branches: Vec::new(),
                calls: Vec::new(),
                next_commit: 1,
            })),
        }
    }

    /// Mark the working tree as having uncommitted changes.
    pub fn with_changes(self) -> Self {
        self.lock().dirty = true;
        self
    }

    /// Replace the remote URL.
    pub fn with_remote_url(self, url: impl Into<String>) -> Self {
        self.lock().remote_url = url.into();
        self
    }

    /// Make `step` fail.
    pub fn fail_at(self, step: Step) -> Self {
        self.lock().fail_at = Some(step);
        self
    }

    /// Branch currently checked out (`None` when detached).
    pub fn checked_out(&self) -> Option<String> {
        self.lock().checked_out.clone()
    }

    /// Whether the working tree still has uncommitted changes.
    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Current HEAD commit.
    pub fn head(&self) -> String {
        self.lock().head.clone()
    }

    /// Tags created so far, as `(tag, commit)`.
    pub fn tags(&self) -> Vec<(String, String)> {
        self.lock().tags.clone()
    }

    /// Branches pushed so far.
    pub fn pushed_branches(&self) -> Vec<String> {
        self.lock().pushed_branches.clone()
    }

    /// Names of the operations invoked, in order.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, step: Step, name: &str) -> Result<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls.push(name.to_string());
        if state.fail_at == Some(step) {
            return Err(Error::CommandFailed {
                command: name.to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(state)
    }
}

impl VersionControl for MockVcs {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn current_branch(&self) -> Result<String> {
        let mut state = self.lock();
        state.calls.push("current_branch".to_string());
        state.checked_out.clone().ok_or(Error::DetachedHead)
    }

    fn remote_url(&self, _remote: &str) -> Result<String> {
        let state = self.enter(Step::RemoteUrl, "remote_url")?;
        Ok(state.remote_url.clone())
    }

    fn detach(&self) -> Result<()> {
        let mut state = self.enter(Step::Detach, "detach")?;
        state.checked_out = None;
        Ok(())
    }

    fn commit_all(&self, _message: &str) -> Result<Option<String>> {
        let mut state = self.enter(Step::Commit, "commit_all")?;
        if !state.dirty {
            return Ok(None);
        }
        let commit = format!("{:040x}", state.next_commit);
        state.next_commit += 1;
        let parent = std::mem::replace(&mut state.head, commit.clone());
        state.history.push(parent);
        state.dirty = false;
        Ok(Some(commit))
    }

    fn head_commit(&self) -> Result<String> {
        let state = self.enter(Step::HeadCommit, "head_commit")?;
        Ok(state.head.clone())
    }

    fn tag_and_push(&self, tag: &str, commit: &str, _remote: &str) -> Result<()> {
        let mut state = self.enter(Step::TagAndPush, "tag_and_push")?;
        state.tags.push((tag.to_string(), commit.to_string()));
        Ok(())
    }

    fn push_branch(&self, branch: &str, _remote: &str) -> Result<()> {
        let mut state = self.enter(Step::PushBranch, "push_branch")?;
        state.pushed_branches.push(branch.to_string());
        Ok(())
    }

    fn untrack_last_commit(&self) -> Result<()> {
        let mut state = self.enter(Step::Untrack, "untrack_last_commit")?;
        if let Some(parent) = state.history.pop() {
            state.head = parent;
            state.dirty = true;
        }
        Ok(())
    }

    fn restore(&self, branch: &str) -> Result<()> {
        let mut state = self.enter(Step::Restore, "restore")?;
        state.checked_out = Some(branch.to_string());
        Ok(())
    }
}
