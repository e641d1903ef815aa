//! # remotekit
//!
//! Get a launch script running on a remote machine.
//!
//! A target descriptor picks an [`Executor`]:
//!
//! | descriptor | executor |
//! |------------|----------|
//! | `host`, `//host` | [`SlurmExecutor`]: SSH, backend detected |
//! | `ssh://host` | [`SshExecutor`]: SSH, general scripts |
//! | `hetzner://cx22`, `aws://t3.large` | [`CloudExecutor`]: provision, then SSH |
//! | `docker://[context]` | [`DockerExecutor`]: local container engine |
//!
//! Every executor bootstraps its script bundle once into a fresh remote
//! folder ([`Executor::setup_remote`]) and then starts jobs with a fixed
//! argument order ([`LaunchCommand`]).
//!
//! ## Example
//!
//! ```no_run
//! use remotekit::{Dispatcher, ExecutorSettings, JobContext, SshOptions};
//! use std::path::Path;
//!
//! let dispatcher = Dispatcher::new(
//!     SshOptions::default(),
//!     cloudkit::CloudSettings::default(),
//!     ExecutorSettings::default(),
//! );
//! let mut executor = dispatcher.resolve("ssh://build-host")?;
//! executor.setup_remote(None, Path::new("."))?;
//!
//! let job = JobContext {
//!     repo_url: "git@github.com:lab/project.git".into(),
//!     snapshot: "3f2a9c1".into(),
//!     modules: vec!["python/3.7".into()],
//!     env: "base".into(),
//! };
//! executor.launch_job(&job, "train.py")?;
//! # Ok::<(), remotekit::Error>(())
//! ```
//!
//! ## Testing
//!
//! [`MockTransport`] and [`MockConnector`] script command results and
//! record every command and upload, so executors can be driven without a
//! network.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bootstrap;
pub mod bundle;
pub mod command;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod mock;
pub mod retry;
pub mod transport;

pub use bootstrap::{BootstrapPlan, ensure_scripts, insert_extra_header};
pub use bundle::{ScriptBundle, ScriptFile};
pub use command::{LaunchCommand, Launcher};
pub use detect::{Backend, detect};
pub use dispatch::{Dispatcher, Scheme, Target};
pub use error::{Error, ErrorCategory, Result};
pub use executor::{
    CloudExecutor, DockerExecutor, Executor, ExecutorKind, ExecutorSettings, JobContext,
    SlurmExecutor, SshExecutor,
};
pub use mock::{MockConnector, MockTransport};
pub use retry::RetryConfig;
pub use transport::{
    CommandOutput, Connector, LocalConnector, LocalTransport, SshConnector, SshOptions,
    SshTransport, Transport,
};
