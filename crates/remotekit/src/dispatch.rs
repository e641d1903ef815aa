//! Target descriptors and the scheme table.
//!
//! ```text
//! target  = scheme "://" host [ "/" path ]
//!         | "//" host          ; no scheme, netloc form
//!         | host               ; no scheme, bare form
//! ```
//!
//! Both scheme-less forms mean the same thing: an SSH host whose backend
//! is detected (SLURM-aware).

use crate::error::{Error, Result};
use crate::executor::{
    CloudExecutor, DockerExecutor, Executor, ExecutorKind, ExecutorSettings, SlurmExecutor,
    SshExecutor,
};
use crate::transport::{Connector, LocalConnector, SshConnector, SshOptions};
use cloudkit::{Cloud, CloudSettings, Provisioner};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Recognized target schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// No scheme: SSH with backend detection
    Detect,
    /// `ssh://`
    Ssh,
    /// `hetzner://<server type>`
    Hetzner,
    /// `aws://<instance type>`
    Aws,
    /// `docker://[context]`
    Docker,
    /// `local://` (recognized, not implemented)
    Local,
}

impl Scheme {
    /// Scheme as written in descriptors (empty for [`Scheme::Detect`]).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detect => "",
            Self::Ssh => "ssh",
            Self::Hetzner => "hetzner",
            Self::Aws => "aws",
            Self::Docker => "docker",
            Self::Local => "local",
        }
    }

    /// Executor variant for this scheme; `None` for unimplemented schemes.
    pub fn executor_kind(&self) -> Option<ExecutorKind> {
        match self {
            Self::Detect => Some(ExecutorKind::Slurm),
            Self::Ssh => Some(ExecutorKind::Ssh),
            Self::Hetzner => Some(ExecutorKind::Hetzner),
            Self::Aws => Some(ExecutorKind::Aws),
            Self::Docker => Some(ExecutorKind::Docker),
            Self::Local => None,
        }
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" => Ok(Self::Detect),
            "ssh" => Ok(Self::Ssh),
            "hetzner" => Ok(Self::Hetzner),
            "aws" => Ok(Self::Aws),
            "docker" => Ok(Self::Docker),
            "local" => Ok(Self::Local),
            other => Err(Error::UnsupportedScheme(other.to_string())),
        }
    }
}

/// A parsed target descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Selected scheme
    pub scheme: Scheme,
    /// Host, machine type or docker context
    pub host: String,
    /// Anything after the host
    pub path: Option<String>,
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(descriptor: &str) -> Result<Self> {
        let descriptor = descriptor.trim();
        let (scheme, rest) = match descriptor.split_once("://") {
            Some((scheme, rest)) => (scheme.parse::<Scheme>()?, rest),
            None => (
                Scheme::Detect,
                descriptor.strip_prefix("//").unwrap_or(descriptor),
            ),
        };

        let (host, path) = match rest.split_once('/') {
            Some((host, path)) if !path.is_empty() => (host, Some(path.to_string())),
            Some((host, _)) => (host, None),
            None => (rest, None),
        };

        if host.is_empty() && !matches!(scheme, Scheme::Docker | Scheme::Local) {
            return Err(Error::InvalidTarget(descriptor.to_string()));
        }

        Ok(Self {
            scheme,
            host: host.to_string(),
            path,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scheme != Scheme::Detect {
            write!(f, "{}://", self.scheme.as_str())?;
        }
        f.write_str(&self.host)?;
        if let Some(path) = &self.path {
            write!(f, "/{path}")?;
        }
        Ok(())
    }
}

/// Builds executors from target descriptors.
pub struct Dispatcher {
    ssh: Arc<dyn Connector>,
    local: Arc<dyn Connector>,
    cloud: CloudSettings,
    provisioners: HashMap<Cloud, Arc<dyn Provisioner>>,
    settings: ExecutorSettings,
}

impl Dispatcher {
    /// Real SSH connections and cloud APIs.
    pub fn new(ssh: SshOptions, cloud: CloudSettings, settings: ExecutorSettings) -> Self {
        Self::with_connectors(
            Arc::new(SshConnector::new(ssh)),
            Arc::new(LocalConnector),
            cloud,
            settings,
        )
    }

    /// Custom connectors for SSH targets and the local container engine.
    pub fn with_connectors(
        ssh: Arc<dyn Connector>,
        local: Arc<dyn Connector>,
        cloud: CloudSettings,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            ssh,
            local,
            cloud,
            provisioners: HashMap::new(),
            settings,
        }
    }

    /// Use `provisioner` for `cloud` instead of the provider's API client.
    pub fn with_provisioner(mut self, cloud: Cloud, provisioner: Arc<dyn Provisioner>) -> Self {
        self.provisioners.insert(cloud, provisioner);
        self
    }

    /// Parse `descriptor` and construct the matching executor.
    ///
    /// Construction connects (and provisions, for cloud schemes).
    pub fn resolve(&self, descriptor: &str) -> Result<Box<dyn Executor>> {
        let target: Target = descriptor.parse()?;
        self.resolve_target(&target)
    }

    /// Construct the executor for an already parsed target.
    pub fn resolve_target(&self, target: &Target) -> Result<Box<dyn Executor>> {
        log::debug!("Resolving target {target} ({:?})", target.scheme);
        let settings = self.settings.clone();

        match target.scheme {
            Scheme::Detect => Ok(Box::new(SlurmExecutor::connect(
                Arc::clone(&self.ssh),
                &target.host,
                settings,
            )?)),
            Scheme::Ssh => Ok(Box::new(SshExecutor::connect(
                Arc::clone(&self.ssh),
                &target.host,
                settings,
            )?)),
            Scheme::Hetzner => self.provision(Cloud::Hetzner, ExecutorKind::Hetzner, target),
            Scheme::Aws => self.provision(Cloud::Aws, ExecutorKind::Aws, target),
            Scheme::Docker => Ok(Box::new(DockerExecutor::connect(
                Arc::clone(&self.local),
                &target.host,
                settings,
            )?)),
            Scheme::Local => Err(Error::not_supported("local", "deployment")),
        }
    }

    fn provision(&self, cloud: Cloud, kind: ExecutorKind, target: &Target) -> Result<Box<dyn Executor>> {
        let provisioner: Arc<dyn Provisioner> = match self.provisioners.get(&cloud) {
            Some(provisioner) => Arc::clone(provisioner),
            None => Arc::from(cloudkit::provisioner(cloud, &self.cloud)?),
        };
        Ok(Box::new(CloudExecutor::provision(
            kind,
            provisioner.as_ref(),
            &target.host,
            Arc::clone(&self.ssh),
            self.settings.clone(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::sample_job as job;
    use crate::mock::{MockConnector, MockTransport};
    use cloudkit::MockProvisioner;
    use tempfile::TempDir;

    fn dispatcher(ssh: &MockTransport, local: &MockTransport) -> Dispatcher {
        Dispatcher::with_connectors(
            Arc::new(MockConnector::new(ssh.clone())),
            Arc::new(MockConnector::new(local.clone())),
            CloudSettings::default(),
            ExecutorSettings::default(),
        )
    }

    #[test]
    fn test_parse_forms() {
        let t: Target = "ssh://build-host".parse().unwrap();
        assert_eq!((t.scheme, t.host.as_str()), (Scheme::Ssh, "build-host"));

        let bare: Target = "mila".parse().unwrap();
        let netloc: Target = "//mila".parse().unwrap();
        assert_eq!(bare, netloc);
        assert_eq!(bare.scheme, Scheme::Detect);

        let t: Target = "aws://t3.large".parse().unwrap();
        assert_eq!((t.scheme, t.host.as_str()), (Scheme::Aws, "t3.large"));

        let t: Target = "ssh://user@host/project".parse().unwrap();
        assert_eq!(t.host, "user@host");
        assert_eq!(t.path.as_deref(), Some("project"));

        let t: Target = "docker://".parse().unwrap();
        assert_eq!(t.host, "");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            "hydra://cluster".parse::<Target>(),
            Err(Error::UnsupportedScheme(s)) if s == "hydra"
        ));
        assert!(matches!(
            "gopher://x".parse::<Target>(),
            Err(Error::UnsupportedScheme(_))
        ));
        assert!(matches!("ssh://".parse::<Target>(), Err(Error::InvalidTarget(_))));
        assert!(matches!("".parse::<Target>(), Err(Error::InvalidTarget(_))));
    }

    #[test]
    fn test_display_round_trip() {
        for descriptor in ["mila", "ssh://build-host", "aws://t3.large", "docker://gpu/x"] {
            let target: Target = descriptor.parse().unwrap();
            assert_eq!(target.to_string(), descriptor);
        }
    }

    #[test]
    fn test_scheme_table() {
        let ssh = MockTransport::new("ssh");
        let local = MockTransport::new("local");
        let d = dispatcher(&ssh, &local)
            .with_provisioner(Cloud::Aws, Arc::new(MockProvisioner::new("1.2.3.4")))
            .with_provisioner(Cloud::Hetzner, Arc::new(MockProvisioner::new("5.6.7.8")));

        for (descriptor, kind) in [
            ("cluster", ExecutorKind::Slurm),
            ("//cluster", ExecutorKind::Slurm),
            ("ssh://build-host", ExecutorKind::Ssh),
            ("hetzner://cx22", ExecutorKind::Hetzner),
            ("aws://t3.large", ExecutorKind::Aws),
            ("docker://", ExecutorKind::Docker),
        ] {
            assert_eq!(d.resolve(descriptor).unwrap().kind(), kind, "{descriptor}");
        }
    }

    #[test]
    fn test_local_and_unknown_schemes() {
        let ssh = MockTransport::new("ssh");
        let local = MockTransport::new("local");
        let d = dispatcher(&ssh, &local);

        assert!(matches!(d.resolve("local://"), Err(Error::NotSupported { .. })));
        assert!(matches!(d.resolve("ssh://"), Err(Error::InvalidTarget(_))));
        assert!(matches!(d.resolve("local://x"), Err(Error::NotSupported { .. })));
        assert!(matches!(d.resolve("ftp://x"), Err(Error::UnsupportedScheme(_))));
        assert!(ssh.connections().is_empty());
    }

    #[test]
    fn test_scenario_direct_ssh() {
        let ssh = MockTransport::new("ssh");
        let local = MockTransport::new("local");
        let project = TempDir::new().unwrap();
        let mut executor = dispatcher(&ssh, &local).resolve("ssh://build-host").unwrap();

        let folder = executor.setup_remote(None, project.path()).unwrap();
        executor.launch_job(&job(), "train.py").unwrap();

        assert_eq!(ssh.connections(), vec!["build-host"]);
        assert_eq!(
            ssh.commands().last().unwrap(),
            &format!(
                "bash -l {folder}/run_experiment.sh git@github.com:lab/project.git train.py \
                 3f2a9c python/3.7@pytorch/1.7 research"
            )
        );
    }

    #[test]
    fn test_scenario_slurm_with_header() {
        let ssh = MockTransport::new("ssh");
        let local = MockTransport::new("local");
        let project = TempDir::new().unwrap();
        let mut executor = dispatcher(&ssh, &local).resolve("cluster").unwrap();

        executor
            .setup_remote(Some("#SBATCH --mem=48GB"), project.path())
            .unwrap();

        let patched: Vec<_> = ssh
            .puts()
            .into_iter()
            .filter(|p| p.contents.contains("#SBATCH --mem=48GB"))
            .map(|p| p.remote)
            .collect();
        assert_eq!(patched.len(), 2);
        assert!(patched.iter().any(|r| r.ends_with("/run_sweep.sh")));
        assert!(patched.iter().any(|r| r.ends_with("/srun_python.sh")));
        assert!(
            ssh.commands()
                .iter()
                .any(|c| c.contains("mktemp -d -p \"${SCRATCH:-$HOME}\""))
        );
    }

    #[test]
    fn test_scenario_cloud() {
        let ssh = MockTransport::new("ssh");
        let local = MockTransport::new("local");
        let provisioner = Arc::new(MockProvisioner::new("54.1.2.3"));
        let project = TempDir::new().unwrap();
        let mut executor = dispatcher(&ssh, &local)
            .with_provisioner(Cloud::Aws, Arc::clone(&provisioner) as Arc<dyn Provisioner>)
            .resolve("aws://t3.large")
            .unwrap();

        assert_eq!(provisioner.requests(), vec!["t3.large"]);
        assert_eq!(ssh.connections(), vec!["54.1.2.3"]);

        executor.setup_remote(None, project.path()).unwrap();
        executor.launch_job(&job(), "train.py").unwrap();
        assert!(
            ssh.commands()
                .last()
                .unwrap()
                .starts_with("bash -l /tmp/experiment_buddy-mock/run_experiment.sh git@github.com:lab/project.git train.py ")
        );
    }

    #[test]
    fn test_docker_uses_local_connector() {
        let ssh = MockTransport::new("ssh");
        let local = MockTransport::new("local");
        let executor = dispatcher(&ssh, &local).resolve("docker://gpu-box").unwrap();

        assert_eq!(executor.host(), "gpu-box");
        assert!(ssh.connections().is_empty());
        assert_eq!(local.connections(), vec!["localhost"]);
    }
}
