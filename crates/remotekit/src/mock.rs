//! Mock transport and connector for testing.
//!
//! Responses are scripted by substring match on the command; every command
//! and upload is recorded. Uploaded file contents are captured at upload
//! time, since patched copies live in temporary files.

use crate::error::{Error, Result};
use crate::transport::{CommandOutput, Connector, Transport};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Canned answer for commands containing a pattern.
#[derive(Debug, Clone)]
enum Reply {
    Ok(String),
    Fail { exit_code: i32, stderr: String },
    Unreachable,
}

/// A recorded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRun {
    /// Host the command ran on
    pub host: String,
    /// The command line
    pub command: String,
    /// Names of extra environment variables passed
    pub env: Vec<String>,
}

/// A recorded upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPut {
    /// Local source path
    pub local: PathBuf,
    /// Remote destination
    pub remote: String,
    /// File contents at upload time
    pub contents: String,
}

#[derive(Debug, Default)]
struct State {
    replies: Vec<(String, Reply)>,
    runs: Vec<RecordedRun>,
    puts: Vec<RecordedPut>,
    connections: Vec<String>,
}

/// Scripted in-memory transport.
///
/// Clones share state; tests keep one handle and give another to the code
/// under test.
#[derive(Debug, Clone)]
pub struct MockTransport {
    host: String,
    state: Arc<Mutex<State>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new("mock-host")
    }
}

impl MockTransport {
    /// A transport where every command succeeds with empty output, except
    /// `mktemp` which returns `/tmp/experiment_buddy-mock`.
    pub fn new(host: impl Into<String>) -> Self {
        let transport = Self {
            host: host.into(),
            state: Arc::default(),
        };
        transport.respond("mktemp", "/tmp/experiment_buddy-mock\n")
    }

    /// Commands containing `pattern` succeed with `stdout`.
    ///
    /// Later rules take precedence over earlier ones.
    pub fn respond(self, pattern: impl Into<String>, stdout: impl Into<String>) -> Self {
        self.push(pattern.into(), Reply::Ok(stdout.into()));
        self
    }

    /// Commands containing `pattern` exit with `exit_code`.
    pub fn fail(self, pattern: impl Into<String>, exit_code: i32, stderr: impl Into<String>) -> Self {
        self.push(
            pattern.into(),
            Reply::Fail {
                exit_code,
                stderr: stderr.into(),
            },
        );
        self
    }

    /// Every command fails with a connection error.
    pub fn unreachable(self) -> Self {
        self.push(String::new(), Reply::Unreachable);
        self
    }

    /// Commands run so far.
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.lock().runs.clone()
    }

    /// Command lines run so far.
    pub fn commands(&self) -> Vec<String> {
        self.lock().runs.iter().map(|r| r.command.clone()).collect()
    }

    /// Uploads so far.
    pub fn puts(&self) -> Vec<RecordedPut> {
        self.lock().puts.clone()
    }

    /// Hosts connected to through a [`MockConnector`].
    pub fn connections(&self) -> Vec<String> {
        self.lock().connections.clone()
    }

    fn push(&self, pattern: String, reply: Reply) {
        self.lock().replies.push((pattern, reply));
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reply_for(state: &State, command: &str) -> Reply {
        state
            .replies
            .iter()
            .rev()
            .find(|(pattern, _)| command.contains(pattern.as_str()))
            .map_or_else(|| Reply::Ok(String::new()), |(_, reply)| reply.clone())
    }

    fn with_host(&self, host: &str) -> Self {
        Self {
            host: host.to_string(),
            state: Arc::clone(&self.state),
        }
    }
}

impl Transport for MockTransport {
    fn host(&self) -> &str {
        &self.host
    }

    fn run(&self, command: &str) -> Result<CommandOutput> {
        self.run_with_env(command, &[])
    }

    fn run_with_env(&self, command: &str, env: &[(&str, &str)]) -> Result<CommandOutput> {
        let mut state = self.lock();
        state.runs.push(RecordedRun {
            host: self.host.clone(),
            command: command.to_string(),
            env: env.iter().map(|(k, _)| (*k).to_string()).collect(),
        });

        match Self::reply_for(&state, command) {
            Reply::Ok(stdout) => Ok(CommandOutput::with_stdout(stdout)),
            Reply::Fail { exit_code, stderr } => Err(Error::CommandFailed {
                command: command.to_string(),
                exit_code: Some(exit_code),
                stdout: String::new(),
                stderr,
            }),
            Reply::Unreachable => Err(Error::Connection {
                host: self.host.clone(),
                message: "Connection refused".to_string(),
            }),
        }
    }

    fn put(&self, local: &Path, remote: &str) -> Result<()> {
        let contents = fs::read_to_string(local)?;
        self.lock().puts.push(RecordedPut {
            local: local.to_path_buf(),
            remote: remote.to_string(),
            contents,
        });
        Ok(())
    }
}

/// Connector handing out [`MockTransport`]s that share one state.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    transport: MockTransport,
}

impl MockConnector {
    /// Connections share `transport`'s state.
    pub fn new(transport: MockTransport) -> Self {
        Self { transport }
    }
}

impl Connector for MockConnector {
    fn connect(&self, host: &str) -> Result<Box<dyn Transport>> {
        self.transport.lock().connections.push(host.to_string());
        let transport = self.transport.with_host(host);
        // Same liveness probe as a real connection
        transport.run("true")?;
        Ok(Box::new(transport))
    }
}
