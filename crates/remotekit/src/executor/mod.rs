//! Executors: one per deployment target.
//!
//! Every executor goes through the same states:
//!
//! ```text
//! constructed -> connected -> scripts ready -> launch / sweep
//! ```
//!
//! Construction opens the connection (provisioning first for cloud
//! targets). [`Executor::setup_remote`] bootstraps the scripts once and
//! memoizes the folder; launching before that is
//! [`Error::ScriptsNotReady`](crate::Error::ScriptsNotReady).
//!
//! An executor owns a single connection and is mutated from one thread at a
//! time. Parallel launches each get their own executor through
//! [`Executor::fork`], which reconnects to the same machine and reuses the
//! scripts folder.

mod cloud;
mod docker;
mod slurm;
mod ssh;

pub use cloud::CloudExecutor;
pub use docker::{DockerExecutor, DEFAULT_CONTEXT};
pub use slurm::SlurmExecutor;
pub use ssh::SshExecutor;

use crate::command::{LaunchCommand, Launcher};
use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Transport};
use std::fmt;
use std::path::{Path, PathBuf};

/// Default parent of the remote scripts folder on SLURM clusters.
pub const DEFAULT_SCRATCH_DIR: &str = "${SCRATCH:-$HOME}";

/// Default tag of the container base image.
pub const DEFAULT_DOCKER_IMAGE: &str = "buddy-base-cpu:latest";

/// Which executor variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutorKind {
    /// Plain SSH host
    Ssh,
    /// SSH host, SLURM-aware
    Slurm,
    /// Hetzner Cloud VM
    Hetzner,
    /// AWS EC2 VM
    Aws,
    /// Local container engine
    Docker,
}

impl ExecutorKind {
    /// Short name used in messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Slurm => "slurm",
            Self::Hetzner => "hetzner",
            Self::Aws => "aws",
            Self::Docker => "docker",
        }
    }

    /// Whether the target is a cloud VM.
    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::Hetzner | Self::Aws)
    }
}

impl fmt::Display for ExecutorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Settings shared by all executors.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Local tracker credential copied to targets that lack one
    pub credential_file: Option<PathBuf>,
    /// Parent of the scripts folder on SLURM clusters (remote shell syntax)
    pub scratch_dir: String,
    /// Container base image tag
    pub docker_image: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            credential_file: None,
            scratch_dir: DEFAULT_SCRATCH_DIR.to_string(),
            docker_image: DEFAULT_DOCKER_IMAGE.to_string(),
        }
    }
}

/// Everything a launch needs besides the entrypoint or sweep id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobContext {
    /// Repository the target clones
    pub repo_url: String,
    /// Snapshot reference to check out
    pub snapshot: String,
    /// Environment modules to load
    pub modules: Vec<String>,
    /// Environment name
    pub env: String,
}

impl JobContext {
    /// Launch command for `script` in `folder` with `target` as entrypoint
    /// or sweep id.
    pub fn command(&self, launcher: Launcher, folder: &str, script: &str, target: &str) -> LaunchCommand {
        LaunchCommand {
            launcher,
            script: format!("{folder}/{script}"),
            repo_url: self.repo_url.clone(),
            target: target.to_string(),
            snapshot: self.snapshot.clone(),
            modules: self.modules.clone(),
            env: self.env.clone(),
        }
    }
}

/// A deployment target.
pub trait Executor: Send + Sync {
    /// Variant of this executor.
    fn kind(&self) -> ExecutorKind;

    /// Host (or context) this executor drives.
    fn host(&self) -> &str;

    /// Run a command on the target.
    fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Copy a file to the target.
    fn put(&self, local: &Path, remote: &str) -> Result<()>;

    /// Bootstrap the launch scripts and return their folder.
    ///
    /// Idempotent: once a folder exists it is returned without touching the
    /// target again.
    fn setup_remote(&mut self, extra_header: Option<&str>, working_dir: &Path) -> Result<String>;

    /// Scripts folder, once set up.
    fn scripts_folder(&self) -> Option<&str>;

    /// Start a single run of `entrypoint`.
    fn launch_job(&mut self, job: &JobContext, entrypoint: &str) -> Result<CommandOutput>;

    /// Start an agent for `sweep_id`.
    fn sweep_agent(&mut self, job: &JobContext, sweep_id: &str) -> Result<CommandOutput>;

    /// A new executor on the same machine with its own connection.
    fn fork(&self) -> Result<Box<dyn Executor>>;
}

/// Scripts folder or [`Error::ScriptsNotReady`].
pub(crate) fn ready(folder: Option<&str>) -> Result<&str> {
    folder.ok_or(Error::ScriptsNotReady)
}

/// Render and run a launch command.
pub(crate) fn dispatch(transport: &dyn Transport, command: &LaunchCommand) -> Result<CommandOutput> {
    let line = command.render();
    log::info!("[{}] {line}", transport.host());
    transport.run(&line)
}

#[cfg(test)]
pub(crate) fn sample_job() -> JobContext {
    JobContext {
        repo_url: "git@github.com:lab/project.git".to_string(),
        snapshot: "3f2a9c".to_string(),
        modules: vec!["python/3.7".to_string(), "pytorch/1.7".to_string()],
        env: "research".to_string(),
    }
}
