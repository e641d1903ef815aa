//! Real git backend that shells out to the `git` CLI.

use crate::error::{Error, Result};
use crate::vcs::VersionControl;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Work tree driven through the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
}

impl GitCli {
    /// Open the work tree containing `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(path)
            .output()?;

        if !output.status.success() {
            return Err(Error::NotARepository(path.to_path_buf()));
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        log::debug!("Opened git work tree at {root}");
        Ok(Self {
            root: PathBuf::from(root),
        })
    }

    /// Run git with `args` in the work tree and return trimmed stdout.
    fn run(&self, args: &[&str]) -> Result<String> {
        log::debug!("git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Whether the index holds staged changes.
    fn has_staged_changes(&self) -> Result<bool> {
        let status = Command::new("git")
            .args(["diff", "--cached", "--quiet"])
            .current_dir(&self.root)
            .status()?;
        // --quiet exits 1 when there are differences
        Ok(!status.success())
    }
}

impl VersionControl for GitCli {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    fn current_branch(&self) -> Result<String> {
        let branch = self.run(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch == "HEAD" {
            return Err(Error::DetachedHead);
        }
        Ok(branch)
    }

    fn remote_url(&self, remote: &str) -> Result<String> {
        self.run(&["remote", "get-url", remote])
    }

    fn detach(&self) -> Result<()> {
        self.run(&["checkout", "--quiet", "--detach"])?;
        Ok(())
    }

    fn commit_all(&self, message: &str) -> Result<Option<String>> {
        self.run(&["add", "--all"])?;
        if !self.has_staged_changes()? {
            return Ok(None);
        }
        self.run(&["commit", "--quiet", "--no-verify", "-m", message])?;
        self.head_commit().map(Some)
    }

    fn head_commit(&self) -> Result<String> {
        self.run(&["rev-parse", "HEAD"])
    }

    fn tag_and_push(&self, tag: &str, commit: &str, remote: &str) -> Result<()> {
        self.run(&["tag", tag, commit])?;
        self.run(&["push", "--quiet", remote, tag])?;
        Ok(())
    }

    fn push_branch(&self, branch: &str, remote: &str) -> Result<()> {
        self.run(&["push", "--quiet", remote, branch])?;
        Ok(())
    }

    fn untrack_last_commit(&self) -> Result<()> {
        self.run(&["reset", "--quiet", "HEAD~1"])?;
        Ok(())
    }

    fn restore(&self, branch: &str) -> Result<()> {
        self.run(&["checkout", "--quiet", branch])?;
        Ok(())
    }
}
