//! Plain SSH host.

use super::{dispatch, ready, Executor, ExecutorKind, ExecutorSettings, JobContext};
use crate::bootstrap::{self, BootstrapPlan};
use crate::bundle::ScriptBundle;
use crate::command::Launcher;
use crate::detect::Backend;
use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Connector, Transport};
use std::path::Path;
use std::sync::Arc;

/// Runs the general script bundle over SSH.
///
/// Sweeps are only available when the executor drives a machine of its own
/// (cloud VMs); on a shared host `sweep_agent` is not supported.
pub struct SshExecutor {
    kind: ExecutorKind,
    host: String,
    connector: Arc<dyn Connector>,
    transport: Box<dyn Transport>,
    settings: ExecutorSettings,
    scripts: Option<String>,
    sweeps: bool,
}

impl SshExecutor {
    /// Connect to `host`.
    pub fn connect(connector: Arc<dyn Connector>, host: &str, settings: ExecutorSettings) -> Result<Self> {
        let transport = connector.connect(host)?;
        Ok(Self {
            kind: ExecutorKind::Ssh,
            host: host.to_string(),
            connector,
            transport,
            settings,
            scripts: None,
            sweeps: false,
        })
    }

    /// Report as `kind` and accept sweep agents.
    pub(crate) fn for_cloud(mut self, kind: ExecutorKind) -> Self {
        self.kind = kind;
        self.sweeps = true;
        self
    }

    /// Same machine, new connection, same scripts folder.
    pub(crate) fn reconnect(&self) -> Result<Self> {
        Ok(Self {
            kind: self.kind,
            host: self.host.clone(),
            connector: Arc::clone(&self.connector),
            transport: self.connector.connect(&self.host)?,
            settings: self.settings.clone(),
            scripts: self.scripts.clone(),
            sweeps: self.sweeps,
        })
    }
}

impl Executor for SshExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
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
        if extra_header.is_some() {
            return Err(Error::not_supported(self.kind, "an extra scheduler header"));
        }

        let bundle = ScriptBundle::resolve(working_dir, Backend::General)?;
        let plan = BootstrapPlan {
            bundle: &bundle,
            parent_dir: None,
            extra_header: None,
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
        if !self.sweeps {
            return Err(Error::not_supported(self.kind, "sweep_agent"));
        }
        let folder = ready(self.scripts.as_deref())?;
        let command = job.command(Launcher::BashLogin, folder, "run_sweep.sh", sweep_id);
        dispatch(self.transport.as_ref(), &command)
    }

    fn fork(&self) -> Result<Box<dyn Executor>> {
        Ok(Box::new(self.reconnect()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::sample_job as job;
    use crate::mock::{MockConnector, MockTransport};
    use std::path::PathBuf;

    fn executor(mock: &MockTransport) -> SshExecutor {
        let connector = Arc::new(MockConnector::new(mock.clone()));
        SshExecutor::connect(connector, "build-host", ExecutorSettings::default()).unwrap()
    }

    fn project() -> PathBuf {
        PathBuf::from("/nonexistent/project")
    }

    #[test]
    fn test_setup_remote_is_idempotent() {
        let mock = MockTransport::new("build-host");
        let mut executor = executor(&mock);

        let first = executor.setup_remote(None, &project()).unwrap();
        let uploads = mock.puts().len();
        let commands = mock.commands().len();
        let second = executor.setup_remote(None, &project()).unwrap();

        assert_eq!(first, second);
        assert_eq!(uploads, ScriptBundle::embedded(Backend::General).files().len());
        assert_eq!(mock.puts().len(), uploads);
        assert_eq!(mock.commands().len(), commands);
    }

    #[test]
    fn test_launch_command() {
        let mock = MockTransport::new("build-host");
        let mut executor = executor(&mock);
        executor.setup_remote(None, &project()).unwrap();

        executor.launch_job(&job(), "train.py").unwrap();
        assert_eq!(
            mock.commands().last().unwrap(),
            "bash -l /tmp/experiment_buddy-mock/run_experiment.sh \
             git@github.com:lab/project.git train.py 3f2a9c python/3.7@pytorch/1.7 research"
        );
    }

    #[test]
    fn test_launch_before_setup() {
        let mock = MockTransport::new("build-host");
        let mut executor = executor(&mock);
        assert!(matches!(
            executor.launch_job(&job(), "train.py"),
            Err(Error::ScriptsNotReady)
        ));
    }

    #[test]
    fn test_sweep_not_supported() {
        let mock = MockTransport::new("build-host");
        let mut executor = executor(&mock);
        executor.setup_remote(None, &project()).unwrap();
        assert!(matches!(
            executor.sweep_agent(&job(), "lab/p/abc123"),
            Err(Error::NotSupported { .. })
        ));
    }

    #[test]
    fn test_extra_header_not_supported() {
        let mock = MockTransport::new("build-host");
        let mut executor = executor(&mock);
        let err = executor
            .setup_remote(Some("#SBATCH --mem=48GB"), &project())
            .unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
        assert!(mock.puts().is_empty());
    }

    #[test]
    fn test_fork_reconnects_and_shares_folder() {
        let mock = MockTransport::new("build-host");
        let mut executor = executor(&mock);
        executor.setup_remote(None, &project()).unwrap();

        let fork = executor.fork().unwrap();
        assert_eq!(fork.scripts_folder(), executor.scripts_folder());
        assert_eq!(mock.connections(), vec!["build-host", "build-host"]);
    }

    #[test]
    fn test_connection_failure() {
        let connector = Arc::new(MockConnector::new(MockTransport::default().unreachable()));
        let result = SshExecutor::connect(connector, "down", ExecutorSettings::default());
        assert!(matches!(result, Err(Error::Connection { .. })));
    }
}
