//! The snapshot sequence.

use crate::error::{Error, Result};
use crate::vcs::VersionControl;

/// Prefix of the tags created for snapshot commits.
pub const TAG_PREFIX: &str = "snapshot";

/// An immutable, pushed reference to the code being launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Commit hash the remote side checks out.
    pub reference: String,
    /// Branch that was checked out before (and after) the snapshot.
    pub branch: String,
    /// Tag pushed for the snapshot commit, if a commit was made.
    pub tag: Option<String>,
    /// Fetch URL of the remote the reference was pushed to.
    pub repo_url: String,
}

/// Reject remotes the remote host cannot fetch from non-interactively.
pub fn ensure_ssh_remote(url: &str) -> Result<()> {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Err(Error::UnsupportedRemote {
            url: url.to_string(),
        });
    }
    Ok(())
}

/// Tag name for a snapshot of `branch` at `commit`.
pub fn snapshot_tag(branch: &str, commit: &str) -> String {
    format!("{TAG_PREFIX}/{branch}/{commit}")
}

/// Snapshot the working tree and push it to `remote`.
///
/// Uncommitted changes are committed on a detached HEAD, tagged, pushed and
/// then un-committed again, so the branch history is left untouched. When
/// there is nothing to commit the branch itself is pushed and its tip is
/// used. The original branch is checked out again whatever happens.
pub fn snapshot(vcs: &dyn VersionControl, remote: &str, message: &str) -> Result<Snapshot> {
    let repo_url = vcs.remote_url(remote)?;
    ensure_ssh_remote(&repo_url)?;

    let branch = vcs.current_branch()?;
    log::info!("Snapshotting {} (branch {branch})", vcs.repo_root().display());

    let synced = sync_detached(vcs, &branch, remote, message);
    let restored = vcs.restore(&branch);

    match (synced, restored) {
        (Ok((reference, tag)), Ok(())) => Ok(Snapshot {
            reference,
            branch,
            tag,
            repo_url,
        }),
        (Err(err), restored) => {
            if let Err(restore_err) = restored {
                log::error!("Could not check out {branch} again: {restore_err}");
            }
            Err(err)
        }
        (Ok(_), Err(err)) => Err(err),
    }
}

fn sync_detached(
    vcs: &dyn VersionControl,
    branch: &str,
    remote: &str,
    message: &str,
) -> Result<(String, Option<String>)> {
    vcs.detach()?;

    let Some(commit) = vcs.commit_all(message)? else {
        log::debug!("Nothing to commit, pushing {branch}");
        vcs.push_branch(branch, remote)?;
        return Ok((vcs.head_commit()?, None));
    };

    let tag = snapshot_tag(branch, &commit);
    let pushed = vcs.tag_and_push(&tag, &commit, remote);
    // The snapshot commit must not stay on HEAD, even if the push failed,
    // or the restore would drop the uncommitted changes.
    let untracked = vcs.untrack_last_commit();
    pushed?;
    untracked?;

    log::info!("Pushed {tag}");
    Ok((commit, Some(tag)))
}
