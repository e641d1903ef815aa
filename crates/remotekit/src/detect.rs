//! Remote backend detection.

use crate::error::Result;
use crate::transport::Transport;
use std::fmt;
use std::path::Path;

/// SLURM liveness probe; the login shell profile puts `scontrol` on PATH.
pub const SLURM_PROBE: &str = "source /etc/profile; scontrol ping";

/// Container tooling probes, all of which must succeed.
pub const DOCKER_PROBES: [&str; 2] = ["docker -v", "docker-compose -v"];

/// Job-management flavor of a remote machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// SLURM scheduler available
    Slurm,
    /// Project has a Dockerfile and the host has docker tooling
    Docker,
    /// Plain shell
    General,
}

impl Backend {
    /// Name of the script bundle subdirectory.
    pub fn bundle_dir(&self) -> &'static str {
        match self {
            Self::Slurm => "slurm",
            Self::Docker => "docker",
            Self::General => "general",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.bundle_dir())
    }
}

/// Classify the remote behind `transport`.
///
/// Priority is SLURM, then docker (only when `project_dir` has a
/// `Dockerfile`), then general.
pub fn detect(transport: &dyn Transport, project_dir: &Path) -> Result<Backend> {
    if transport.probe(SLURM_PROBE)? {
        log::info!("{} has a responsive SLURM controller", transport.host());
        return Ok(Backend::Slurm);
    }

    if !project_dir.join("Dockerfile").is_file() {
        return Ok(Backend::General);
    }

    for probe in DOCKER_PROBES {
        if !transport.probe(probe)? {
            log::info!("Dockerfile found but `{probe}` failed on {}", transport.host());
            return Ok(Backend::General);
        }
    }
    Ok(Backend::Docker)
}
