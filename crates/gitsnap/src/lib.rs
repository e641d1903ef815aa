//! # gitsnap
//!
//! Snapshot a git working tree into an immutable reference that a remote
//! machine can fetch, without disturbing the branch you are working on.
//!
//! The sequence is:
//! - reject HTTP(S) remotes (remote hosts fetch over SSH)
//! - detach HEAD and commit everything, tolerating "nothing to commit"
//! - tag the commit as `snapshot/<branch>/<hash>` and push the tag
//! - drop the commit again so the branch history is unchanged
//! - check the original branch out again, even when a step failed
//!
//! ## Example
//!
//! ```no_run
//! use gitsnap::{GitCli, snapshot};
//! use std::path::Path;
//!
//! let repo = GitCli::open(Path::new(".")).expect("not a git repository");
//! let snap = snapshot(&repo, "origin", "lr sweep").expect("snapshot failed");
//! println!("{} @ {}", snap.repo_url, snap.reference);
//! ```
//!
//! ## Testing
//!
//! [`MockVcs`] implements [`VersionControl`] in memory and can fail any
//! [`Step`] of the sequence on demand.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod git;
pub mod mock;
pub mod snapshot;
pub mod vcs;

pub use error::{Error, Result};
pub use git::GitCli;
pub use mock::{MockVcs, Step};
pub use snapshot::{Snapshot, ensure_ssh_remote, snapshot, snapshot_tag};
pub use vcs::VersionControl;
