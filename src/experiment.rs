//! Experiment naming and pre-deployment checks.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Set by the scheduler inside a SLURM job.
pub const ENV_SLURM_JOB_ID: &str = "SLURM_JOB_ID";

/// Set by the launch scripts on the target.
pub const ENV_IS_DEPLOYED: &str = "BUDDY_IS_DEPLOYED";

/// Names runs after a branch under test instead of prompting.
pub const ENV_TESTING_BRANCH: &str = "BUDDY_CURRENT_TESTING_BRANCH";

/// Forces sequential launches (one job at a time, in this thread).
pub const ENV_DEBUG_DEPLOYMENT: &str = "BUDDY_DEBUG_DEPLOYMENT";

/// Prefix of experiment ids of remote runs.
pub const CLUSTER_PREFIX: &str = "[CLUSTER] ";

/// Deployment-related environment, read once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployEnv {
    pub slurm_job_id: Option<String>,
    pub is_deployed: bool,
    pub testing_branch: Option<String>,
    pub debug_deployment: bool,
}

impl DeployEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let set = |key: &str| lookup(key).is_some_and(|v| !v.is_empty());
        Self {
            slurm_job_id: lookup(ENV_SLURM_JOB_ID),
            is_deployed: lookup(ENV_IS_DEPLOYED).is_some(),
            testing_branch: lookup(ENV_TESTING_BRANCH).filter(|v| !v.is_empty()),
            debug_deployment: set(ENV_DEBUG_DEPLOYMENT),
        }
    }

    /// Whether this process already runs on a target.
    pub fn already_deployed(&self) -> bool {
        self.slurm_job_id.is_some() || self.is_deployed
    }
}

/// Experiment id for a remote run.
///
/// `name` wins, then the testing branch, then `prompt` (called with a
/// title such as `[CLUSTER-SWEEP]`).
pub fn experiment_id(
    name: Option<&str>,
    env: &DeployEnv,
    sweep: bool,
    prompt: impl FnOnce(&str) -> Result<String>,
) -> Result<String> {
    let raw = match (name, &env.testing_branch) {
        (Some(name), _) => name.to_string(),
        (None, Some(branch)) => format!("TESTING_BRANCH-{branch}-{}", uuid::Uuid::new_v4()),
        (None, None) => {
            let title = if sweep { "[CLUSTER-SWEEP]" } else { "[CLUSTER]" };
            prompt(title)?
        }
    };
    Ok(format!("{CLUSTER_PREFIX}{}", normalize_id(&raw)))
}

/// Spaces become underscores; empty becomes `no_id`.
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        "no_id".to_string()
    } else {
        trimmed.replace(' ', "_")
    }
}

/// Warning when no module looks like a python module.
pub fn module_warning(modules: &[String]) -> Option<String> {
    if modules.iter().any(|m| m.contains("python")) {
        None
    } else {
        Some(format!(
            "No python module in [{}], are you sure?",
            modules.join(", ")
        ))
    }
}

/// Warning when `requirements.txt` pulls torch without a CUDA build pin.
pub fn torch_warning(requirements: &str) -> Option<&'static str> {
    let pinned = Regex::new(r"torch==.*cu.*").is_ok_and(|re| re.is_match(requirements));
    if requirements.contains("torch") && !pinned {
        Some(
            "requirements.txt installs torch without a CUDA build pin; \
             the cluster may get an unsupported wheel. Pin e.g. torch==1.7.1+cu110",
        )
    } else {
        None
    }
}

/// [`torch_warning`] for the `requirements.txt` in `project_dir`, if any.
pub fn torch_warning_for(project_dir: &Path) -> Option<&'static str> {
    let requirements = fs::read_to_string(project_dir.join("requirements.txt")).ok()?;
    torch_warning(&requirements)
}

/// Tracker project name: basename of the remote URL without `.git`.
pub fn project_name(repo_url: &str) -> Option<String> {
    let trimmed = repo_url.trim_end_matches('/');
    let base = trimmed.rsplit(['/', ':']).next()?;
    let name = base.strip_suffix(".git").unwrap_or(base);
    (!name.is_empty()).then(|| name.to_string())
}

/// `entrypoint` as a path relative to the repository root.
///
/// Relative inputs are taken relative to `cwd`. The file must exist.
pub fn relative_entrypoint(entrypoint: &Path, repo_root: &Path, cwd: &Path) -> Result<String> {
    let absolute = if entrypoint.is_absolute() {
        entrypoint.to_path_buf()
    } else {
        cwd.join(entrypoint)
    };
    let absolute = fs::canonicalize(&absolute)
        .with_context(|| format!("Entrypoint not found: {}", entrypoint.display()))?;
    let root = fs::canonicalize(repo_root)
        .with_context(|| format!("Repository root not found: {}", repo_root.display()))?;

    match absolute.strip_prefix(&root) {
        Ok(relative) => Ok(relative.to_string_lossy().to_string()),
        Err(_) => bail!(
            "Entrypoint {} is outside the repository {}",
            entrypoint.display(),
            root.display()
        ),
    }
}

// ============================================================================
// Tests
// ============================================================================
