//! Transports: where commands run and files go.
//!
//! [`SshTransport`] drives the system `ssh`/`scp` binaries over a single
//! multiplexed master connection, so all `ssh_config` settings (jump hosts,
//! identities, user names) apply. [`LocalTransport`] runs commands on this
//! machine and is what the docker executor talks to the container engine
//! through.

use crate::command::quote;
use crate::error::{Error, Result};
use crate::retry::{self, LogCallback, RetryConfig};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tempfile::TempDir;

/// Exit status ssh uses for its own (connection) errors.
const SSH_CONNECTION_ERROR: i32 = 255;

/// Captured result of a command that exited successfully.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
    /// Exit code
    pub exit_code: i32,
}

impl CommandOutput {
    /// A successful, silent command with the given stdout.
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

/// A live handle to a machine that can run shell commands and receive files.
pub trait Transport: Send + Sync {
    /// Host the transport talks to.
    fn host(&self) -> &str;

    /// Run a shell command. A non-zero exit is [`Error::CommandFailed`].
    fn run(&self, command: &str) -> Result<CommandOutput>;

    /// Run a shell command with extra environment variables.
    ///
    /// The default implementation exports the variables inline, which makes
    /// their values part of the command line.
    fn run_with_env(&self, command: &str, env: &[(&str, &str)]) -> Result<CommandOutput> {
        if env.is_empty() {
            return self.run(command);
        }
        let exports: Vec<String> = env
            .iter()
            .map(|(key, value)| format!("{key}={}", quote(value)))
            .collect();
        self.run(&format!("env {} {command}", exports.join(" ")))
    }

    /// Copy a local file to `remote`, creating parent directories.
    fn put(&self, local: &Path, remote: &str) -> Result<()>;

    /// Run a command whose exit status answers a yes/no question.
    ///
    /// Non-zero exit means "no"; transport errors still propagate.
    fn probe(&self, command: &str) -> Result<bool> {
        match self.run(command) {
            Ok(_) => Ok(true),
            Err(Error::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Opens transports to hosts.
pub trait Connector: Send + Sync {
    /// Open a connection to `host`.
    fn connect(&self, host: &str) -> Result<Box<dyn Transport>>;
}

fn command_result(command: &str, output: Output) -> Result<CommandOutput> {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: command.to_string(),
            exit_code: output.status.code(),
            stdout,
            stderr,
        });
    }

    Ok(CommandOutput {
        stdout,
        stderr,
        exit_code: output.status.code().unwrap_or_default(),
    })
}

// =============================================================================
// SSH
// =============================================================================

/// Options for SSH connections.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// `ConnectTimeout` per attempt
    pub connect_timeout: Duration,
    /// Forward the local SSH agent (`-A`), needed to clone private repos remotely
    pub forward_agent: bool,
    /// Never prompt for passwords or host keys
    pub batch_mode: bool,
    /// Retry policy for opening the connection
    pub retry: RetryConfig,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            forward_agent: true,
            batch_mode: true,
            retry: RetryConfig::default(),
        }
    }
}

/// SSH connection multiplexed over an OpenSSH control master.
///
/// The master is started when the transport is opened and stopped when it
/// is dropped.
pub struct SshTransport {
    host: String,
    options: SshOptions,
    control_dir: TempDir,
}

impl SshTransport {
    /// Open a connection to `host`, retrying per `options.retry`.
    ///
    /// A bare `true` is run as liveness probe once the master is up.
    pub fn open(host: &str, options: SshOptions) -> Result<Self> {
        let transport = Self {
            host: host.to_string(),
            options,
            control_dir: tempfile::Builder::new().prefix("buddy-ssh-").tempdir()?,
        };

        log::info!("Connecting to {host}");
        retry::with_retry(&transport.options.retry, Some(&LogCallback), || {
            transport.run("true").map(|_| ())
        })?;
        log::debug!("Connected to {host}");

        Ok(transport)
    }

    fn control_path(&self) -> PathBuf {
        self.control_dir.path().join("master")
    }

    /// `-o` options shared by `ssh` and `scp`.
    fn common_options(&self) -> Vec<String> {
        let mut options = vec![
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ControlMaster=auto".to_string(),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path().display()),
            "-o".to_string(),
            "ControlPersist=600".to_string(),
        ];
        if self.options.batch_mode {
            options.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
        }
        options
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(self.common_options());
        if self.options.forward_agent {
            cmd.arg("-A");
        }
        cmd.stdin(Stdio::null());
        cmd
    }

    fn connection_error(&self, message: impl Into<String>) -> Error {
        Error::Connection {
            host: self.host.clone(),
            message: message.into(),
        }
    }
}

impl Transport for SshTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> Result<CommandOutput> {
        log::debug!("[{}] $ {command}", self.host);
        let output = self
            .ssh()
            .arg(&self.host)
            .arg("--")
            .arg(command)
            .output()?;

        if output.status.code() == Some(SSH_CONNECTION_ERROR) {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.connection_error(stderr.trim()));
        }

        command_result(command, output)
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        if let Some(parent) = Path::new(remote).parent().filter(|p| !p.as_os_str().is_empty()) {
            self.run(&format!("mkdir -p {}", quote(&parent.to_string_lossy())))?;
        }

        log::debug!("[{}] put {} -> {remote}", self.host, local.display());
        let output = Command::new("scp")
            .arg("-q")
            .args(self.common_options())
            .arg(local)
            .arg(format!("{}:{remote}", self.host))
            .stdin(Stdio::null())
            .output()?;

        command_result(&format!("scp {} {remote}", local.display()), output).map(|_| ())
    }
}

impl Drop for SshTransport {
    fn drop(&mut self) {
        let _ = Command::new("ssh")
            .args(["-o", &format!("ControlPath={}", self.control_path().display())])
            .args(["-O", "exit", &self.host])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
}

/// Opens [`SshTransport`]s.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    /// Create a connector with the given options.
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

impl Connector for SshConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn Transport>> {
        Ok(Box::new(SshTransport::open(host, self.options.clone())?))
    }
}

// =============================================================================
// Local
// =============================================================================

/// Runs commands on this machine through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn host(&self) -> &str {
        "localhost"
    }

    fn run(&self, command: &str) -> Result<CommandOutput> {
        self.run_with_env(command, &[])
    }

    fn run_with_env(&self, command: &str, env: &[(&str, &str)]) -> Result<CommandOutput> {
        log::debug!("$ {command}");
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(env.iter().copied())
            .stdin(Stdio::null())
            .output()?;
        command_result(command, output)
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        let target = Path::new(remote);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local, target)?;
        Ok(())
    }
}

/// Hands out [`LocalTransport`]s regardless of host.
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl Connector for LocalConnector {
    fn connect(&self, _host: &str) -> Result<Box<dyn Transport>> {
        Ok(Box::new(LocalTransport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_run_captures_stdout() {
        let output = LocalTransport.run("echo hello").unwrap();
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.exit_code, 0);
    }

    #[test]
    fn test_local_run_non_zero_is_command_failed() {
        let err = LocalTransport.run("echo oops >&2; exit 3").unwrap_err();
        match err {
            Error::CommandFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.trim(), "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_probe_maps_failure_to_false() {
        assert!(LocalTransport.probe("true").unwrap());
        assert!(!LocalTransport.probe("false").unwrap());
    }

    #[test]
    fn test_local_run_with_env() {
        let output = LocalTransport
            .run_with_env("printf %s \"$BUDDY_TEST_VALUE\"", &[("BUDDY_TEST_VALUE", "a b")])
            .unwrap();
        assert_eq!(output.stdout, "a b");
    }

    #[test]
    fn test_local_put_creates_parents() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source.sh");
        fs::write(&source, "echo hi\n").unwrap();
        let target = dir.path().join("nested/deeper/run.sh");

        LocalTransport
            .put(&source, &target.to_string_lossy())
            .unwrap();

        assert_eq!(fs::read_to_string(target).unwrap(), "echo hi\n");
    }

    #[test]
    fn test_ssh_defaults() {
        let options = SshOptions::default();
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert!(options.forward_agent);
        assert_eq!(options.retry.max_attempts, 10);
    }
}
