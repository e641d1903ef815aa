//! Cloud VM: provision, then behave like a plain SSH host.

use super::{Executor, ExecutorKind, ExecutorSettings, JobContext, SshExecutor};
use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Connector};
use cloudkit::{Instance, Provisioner};
use std::path::Path;
use std::sync::Arc;

/// SSH executor on a freshly provisioned instance.
///
/// The instance is dedicated to this deployment, so sweep agents are
/// allowed. Provisioning errors are not retried; the SSH connection to the
/// new machine is, which covers the time sshd needs to come up.
pub struct CloudExecutor {
    instance: Instance,
    inner: SshExecutor,
}

impl CloudExecutor {
    /// Provision a `machine_type` instance and connect to it.
    pub fn provision(
        kind: ExecutorKind,
        provisioner: &dyn Provisioner,
        machine_type: &str,
        connector: Arc<dyn Connector>,
        settings: ExecutorSettings,
    ) -> Result<Self> {
        log::info!("Provisioning a {machine_type} instance on {}", provisioner.name());
        let instance = provisioner.provision(machine_type)?;
        log::info!("Instance {} is up at {}", instance.id, instance.address);

        let inner = SshExecutor::connect(connector, &instance.ssh_host(), settings)?.for_cloud(kind);
        Ok(Self { instance, inner })
    }

    /// The provisioned instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }
}

impl Executor for CloudExecutor {
    fn kind(&self) -> ExecutorKind {
        self.inner.kind()
    }

    fn host(&self) -> &str {
        self.inner.host()
    }

    fn run(&self, command: &str) -> Result<CommandOutput> {
        self.inner.run(command)
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        self.inner.put(local, remote)
    }

    fn setup_remote(&mut self, extra_header: Option<&str>, working_dir: &Path) -> Result<String> {
        if self.inner.scripts_folder().is_none() && extra_header.is_some() {
            return Err(Error::not_supported(self.kind(), "an extra scheduler header"));
        }
        self.inner.setup_remote(None, working_dir)
    }

    fn scripts_folder(&self) -> Option<&str> {
        self.inner.scripts_folder()
    }

    fn launch_job(&mut self, job: &JobContext, entrypoint: &str) -> Result<CommandOutput> {
        self.inner.launch_job(job, entrypoint)
    }

    fn sweep_agent(&mut self, job: &JobContext, sweep_id: &str) -> Result<CommandOutput> {
        self.inner.sweep_agent(job, sweep_id)
    }

    fn fork(&self) -> Result<Box<dyn Executor>> {
        Ok(Box::new(Self {
            instance: self.instance.clone(),
            inner: self.inner.reconnect()?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::sample_job as job;
    use crate::mock::{MockConnector, MockTransport};
    use cloudkit::MockProvisioner;
    use tempfile::TempDir;

    fn provision(mock: &MockTransport, provisioner: &MockProvisioner) -> Result<CloudExecutor> {
        CloudExecutor::provision(
            ExecutorKind::Aws,
            provisioner,
            "t3.large",
            Arc::new(MockConnector::new(mock.clone())),
            ExecutorSettings::default(),
        )
    }

    #[test]
    fn test_connects_to_provisioned_address() {
        let mock = MockTransport::new("unused");
        let provisioner = MockProvisioner::new("54.1.2.3");

        let executor = provision(&mock, &provisioner).unwrap();
        assert_eq!(provisioner.requests(), vec!["t3.large"]);
        assert_eq!(mock.connections(), vec!["54.1.2.3"]);
        assert_eq!(executor.kind(), ExecutorKind::Aws);
        assert_eq!(executor.instance().machine_type, "t3.large");
    }

    #[test]
    fn test_provisioning_failure_does_not_connect() {
        let mock = MockTransport::new("unused");
        let provisioner = MockProvisioner::failing();

        let err = provision(&mock, &provisioner).err().unwrap();
        assert!(matches!(err, Error::Provisioning(_)));
        assert!(mock.connections().is_empty());
    }

    #[test]
    fn test_launch_and_sweep() {
        let mock = MockTransport::new("unused");
        let provisioner = MockProvisioner::new("54.1.2.3");
        let project = TempDir::new().unwrap();
        let mut executor = provision(&mock, &provisioner).unwrap();

        executor.setup_remote(None, project.path()).unwrap();
        executor.launch_job(&job(), "train.py").unwrap();
        executor.sweep_agent(&job(), "lab/project/abc123").unwrap();

        let commands = mock.commands();
        let n = commands.len();
        assert!(commands[n - 2].starts_with("bash -l /tmp/experiment_buddy-mock/run_experiment.sh "));
        assert!(commands[n - 1].starts_with("bash -l /tmp/experiment_buddy-mock/run_sweep.sh "));
    }

    #[test]
    fn test_fork_does_not_provision_again() {
        let mock = MockTransport::new("unused");
        let provisioner = MockProvisioner::new("54.1.2.3");
        let project = TempDir::new().unwrap();
        let mut executor = provision(&mock, &provisioner).unwrap();
        executor.setup_remote(None, project.path()).unwrap();

        let fork = executor.fork().unwrap();
        assert_eq!(provisioner.requests().len(), 1);
        assert_eq!(mock.connections(), vec!["54.1.2.3", "54.1.2.3"]);
        assert_eq!(fork.scripts_folder(), Some("/tmp/experiment_buddy-mock"));
    }

    #[test]
    fn test_extra_header_rejected() {
        let mock = MockTransport::new("unused");
        let provisioner = MockProvisioner::new("54.1.2.3");
        let project = TempDir::new().unwrap();
        let mut executor = provision(&mock, &provisioner).unwrap();

        assert!(matches!(
            executor.setup_remote(Some("#SBATCH --mem=1G"), project.path()),
            Err(Error::NotSupported { .. })
        ));
    }
}
