//! One deployment, start to finish.
//!
//! ```text
//! parse target -> snapshot -> resolve executor -> bootstrap scripts -> fan out
//! ```
//!
//! The snapshot and the bootstrap both finish before the first launch. A
//! target that does not parse fails before anything is committed.

use anyhow::{Context, Result};

use crate::fanout::{self, FanOut, JobOutcome, Workload};
use gitsnap::{Snapshot, VersionControl};
use remotekit::{Dispatcher, ExecutorKind, JobContext, Target};

/// Everything `deploy` decided before touching the repository.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub target: String,
    /// Also the snapshot commit message
    pub experiment_id: String,
    pub workload: Workload,
    pub modules: Vec<String>,
    pub env: String,
    pub extra_header: Option<String>,
    pub fan_out: FanOut,
}

/// What a finished deployment did.
#[derive(Debug)]
pub struct Deployment {
    pub snapshot: Snapshot,
    pub kind: ExecutorKind,
    pub host: String,
    pub scripts_folder: String,
    pub outcomes: Vec<JobOutcome>,
}

impl Deployment {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }
}

/// State of a deployment: the dispatcher, the repository and its remote.
pub struct DeploymentSession<'a> {
    dispatcher: &'a Dispatcher,
    vcs: &'a dyn VersionControl,
    remote: String,
}

impl<'a> DeploymentSession<'a> {
    pub fn new(dispatcher: &'a Dispatcher, vcs: &'a dyn VersionControl, remote: impl Into<String>) -> Self {
        Self {
            dispatcher,
            vcs,
            remote: remote.into(),
        }
    }

    pub fn deploy(&self, request: &DeployRequest) -> Result<Deployment> {
        let target: Target = request
            .target
            .parse()
            .with_context(|| format!("Invalid target '{}'", request.target))?;

        let snapshot = gitsnap::snapshot(self.vcs, &self.remote, &request.experiment_id)
            .context("Could not snapshot the working tree")?;
        log::info!("Snapshot {} pushed to {}", snapshot.reference, snapshot.repo_url);

        let mut executor = self
            .dispatcher
            .resolve_target(&target)
            .with_context(|| format!("Could not reach {target}"))?;

        let scripts_folder = executor
            .setup_remote(request.extra_header.as_deref(), self.vcs.repo_root())
            .with_context(|| format!("Could not set up scripts on {}", executor.host()))?;

        let job = JobContext {
            repo_url: snapshot.repo_url.clone(),
            snapshot: snapshot.reference.clone(),
            modules: request.modules.clone(),
            env: request.env.clone(),
        };
        let outcomes = fanout::run(executor.as_mut(), &job, &request.workload, request.fan_out)?;

        Ok(Deployment {
            kind: executor.kind(),
            host: executor.host().to_string(),
            snapshot,
            scripts_folder,
            outcomes,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
