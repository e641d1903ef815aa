//! SSH host with backend detection.
//!
//! Scheme-less targets land here. The detected backend picks the script
//! bundle; on SLURM clusters the scripts folder goes to scratch space and
//! jobs are submitted through `sbatch`.

use super::{dispatch, ready, Executor, ExecutorKind, ExecutorSettings, JobContext};
use crate::bootstrap::{self, BootstrapPlan};
use crate::bundle::ScriptBundle;
use crate::command::Launcher;
use crate::detect::{self, Backend};
use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Connector, Transport};
use std::path::Path;
use std::sync::Arc;

/// Backend-aware SSH executor.
pub struct SlurmExecutor {
    host: String,
    connector: Arc<dyn Connector>,
    transport: Box<dyn Transport>,
    settings: ExecutorSettings,
    backend: Option<Backend>,
    scripts: Option<String>,
}

impl SlurmExecutor {
    /// Connect to `host`. Detection runs on first setup.
    pub fn connect(connector: Arc<dyn Connector>, host: &str, settings: ExecutorSettings) -> Result<Self> {
        let transport = connector.connect(host)?;
        Ok(Self {
            host: host.to_string(),
            connector,
            transport,
            settings,
            backend: None,
            scripts: None,
        })
    }

    /// Detected backend, probing the host on first use.
    pub fn backend(&mut self, working_dir: &Path) -> Result<Backend> {
        if let Some(backend) = self.backend {
            return Ok(backend);
        }
        let backend = detect::detect(self.transport.as_ref(), working_dir)?;
        log::info!("{} backend: {backend}", self.host);
        self.backend = Some(backend);
        Ok(backend)
    }
}

impl Executor for SlurmExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Slurm
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> Result<CommandOutput> {
        self.transport.run(command)
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.transport.put(local, remote)
    }

    fn setup_remote(&mut self, extra_header: Option<&str>, working_dir: &Path) -> Result<String> {
        if let Some(folder) = &self.scripts {
            return Ok(folder.clone());
        }

        let backend = self.backend(working_dir)?;
        if backend != Backend::Slurm && extra_header.is_some() {
            log::warn!("{} has no SLURM scheduler; ignoring the extra header", self.host);
        }

        let bundle = ScriptBundle::resolve(working_dir, backend)?;
        let plan = BootstrapPlan {
            bundle: &bundle,
            parent_dir: (backend == Backend::Slurm).then_some(self.settings.scratch_dir.as_str()),
            extra_header: extra_header.filter(|_| backend == Backend::Slurm),
            credential: self.settings.credential_file.as_deref(),
        };
        let folder = bootstrap::ensure_scripts(self.transport.as_ref(), &plan)?;
        self.scripts = Some(folder.clone());
        Ok(folder)
    }

    fn scripts_folder(&self) -> Option<&str> {
        self.scripts.as_deref()
    }

    fn launch_job(&mut self, job: &JobContext, entrypoint: &str) -> Result<CommandOutput> {
        let folder = ready(self.scripts.as_deref())?;
        let command = job.command(Launcher::BashLogin, folder, "run_experiment.sh", entrypoint);
        dispatch(self.transport.as_ref(), &command)
    }

    fn sweep_agent(&mut self, job: &JobContext, sweep_id: &str) -> Result<CommandOutput> {
        let folder = ready(self.scripts.as_deref())?;
        let launcher = match self.backend {
            Some(Backend::Slurm) => Launcher::Sbatch,
            Some(Backend::General) => Launcher::BashLogin,
            Some(Backend::Docker) | None => {
                return Err(Error::not_supported(
                    format!("{} ({})", ExecutorKind::Slurm, Backend::Docker),
                    "sweep_agent",
                ));
            }
        };
        let command = job.command(launcher, folder, "run_sweep.sh", sweep_id);
        dispatch(self.transport.as_ref(), &command)
    }

    fn fork(&self) -> Result<Box<dyn Executor>> {
        Ok(Box::new(Self {
            host: self.host.clone(),
            connector: Arc::clone(&self.connector),
            transport: self.connector.connect(&self.host)?,
            settings: self.settings.clone(),
            backend: self.backend,
            scripts: self.scripts.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::sample_job as job;
    use crate::mock::{MockConnector, MockTransport};
    use std::fs;
    use tempfile::TempDir;

    const HEADER: &str = "#SBATCH --mem=48GB";

    fn executor(mock: &MockTransport) -> SlurmExecutor {
        let connector = Arc::new(MockConnector::new(mock.clone()));
        SlurmExecutor::connect(connector, "cluster", ExecutorSettings::default()).unwrap()
    }

    #[test]
    fn test_slurm_setup_patches_templates_in_scratch() {
        let mock = MockTransport::new("cluster");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock);

        executor.setup_remote(Some(HEADER), project.path()).unwrap();

        assert!(
            mock.commands()
                .iter()
                .any(|c| c.contains("mktemp -d -p \"${SCRATCH:-$HOME}\""))
        );
        let patched: Vec<_> = mock
            .puts()
            .into_iter()
            .filter(|p| p.contents.contains(HEADER))
            .collect();
        assert_eq!(patched.len(), 2);
        for put in patched {
            assert_eq!(put.contents.matches(HEADER).count(), 1);
        }
    }

    #[test]
    fn test_detection_is_memoized() {
        let mock = MockTransport::new("cluster");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock);

        executor.setup_remote(None, project.path()).unwrap();
        executor.setup_remote(None, project.path()).unwrap();
        let probes = mock
            .commands()
            .iter()
            .filter(|c| c.contains("scontrol ping"))
            .count();
        assert_eq!(probes, 1);
    }

    #[test]
    fn test_general_backend_ignores_header() {
        let mock = MockTransport::new("box").fail("scontrol", 127, "not found");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock);

        executor.setup_remote(Some(HEADER), project.path()).unwrap();
        assert!(mock.puts().iter().all(|p| !p.contents.contains(HEADER)));
        assert!(mock.commands().iter().any(|c| c.starts_with("mktemp -d -t")));
    }

    #[test]
    fn test_sweep_uses_sbatch_on_slurm() {
        let mock = MockTransport::new("cluster");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock);
        executor.setup_remote(None, project.path()).unwrap();

        executor.sweep_agent(&job(), "lab/project/abc123").unwrap();
        let last = mock.commands().last().unwrap().clone();
        assert!(last.starts_with("source /etc/profile; sbatch /tmp/experiment_buddy-mock/run_sweep.sh"));
        assert!(last.contains(" lab/project/abc123 3f2a9c "));
    }

    #[test]
    fn test_sweep_uses_bash_on_general() {
        let mock = MockTransport::new("box").fail("scontrol", 127, "not found");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock);
        executor.setup_remote(None, project.path()).unwrap();

        executor.sweep_agent(&job(), "abc123").unwrap();
        assert!(mock.commands().last().unwrap().starts_with("bash -l "));
    }

    #[test]
    fn test_docker_backend_uploads_docker_bundle() {
        let mock = MockTransport::new("box").fail("scontrol", 127, "not found");
        let project = TempDir::new().unwrap();
        fs::write(project.path().join("Dockerfile"), "FROM python:3.11\n").unwrap();
        let mut executor = executor(&mock);

        executor.setup_remote(None, project.path()).unwrap();
        assert!(mock.puts().iter().any(|p| p.remote.ends_with("/Dockerfile")));
        assert!(matches!(
            executor.sweep_agent(&job(), "abc123"),
            Err(Error::NotSupported { .. })
        ));
    }

    #[test]
    fn test_launch_runs_login_shell() {
        let mock = MockTransport::new("cluster");
        let project = TempDir::new().unwrap();
        let mut executor = executor(&mock);
        executor.setup_remote(None, project.path()).unwrap();

        executor.launch_job(&job(), "train.py").unwrap();
        assert!(
            mock.commands()
                .last()
                .unwrap()
                .starts_with("bash -l /tmp/experiment_buddy-mock/run_experiment.sh ")
        );
    }
}
