//! # cloudkit
//!
//! Create a short-lived cloud machine of a given type and wait until it can
//! be reached over SSH.
//!
//! Supported providers:
//! - **Hetzner Cloud** via its REST API (`HCLOUD_TOKEN`)
//! - **AWS EC2** via the `aws` CLI (uses your configured AWS profile)
//!
//! ## Example
//!
//! ```no_run
//! use cloudkit::{Cloud, CloudSettings, Provisioner};
//!
//! let provisioner = cloudkit::provisioner(Cloud::Aws, &CloudSettings::default())
//!     .expect("aws CLI not available");
//! let instance = provisioner.provision("t3.large").expect("provisioning failed");
//! println!("ssh {}", instance.ssh_host());
//! ```
//!
//! Provisioning is never retried: a failure usually means a bad machine type
//! or missing credentials, and retrying could leave extra instances behind.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aws;
pub mod error;
pub mod hetzner;
pub mod mock;

pub use aws::{AwsProvisioner, AwsSettings};
pub use error::{Error, ErrorCategory, Result};
pub use hetzner::{HetznerProvisioner, HetznerSettings};
pub use mock::MockProvisioner;

use std::fmt;
use std::str::FromStr;

/// Supported cloud providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cloud {
    /// Hetzner Cloud.
    Hetzner,
    /// Amazon EC2.
    Aws,
}

impl Cloud {
    /// Target scheme for this provider.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Hetzner => "hetzner",
            Self::Aws => "aws",
        }
    }
}

impl fmt::Display for Cloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

impl FromStr for Cloud {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hetzner" => Ok(Self::Hetzner),
            "aws" => Ok(Self::Aws),
            other => Err(format!("unknown cloud provider: {other}")),
        }
    }
}

/// A provisioned machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Provider-specific instance id.
    pub id: String,
    /// Public hostname or IP address to SSH into.
    pub address: String,
    /// Machine type the instance was created with.
    pub machine_type: String,
    /// Login user of the image, if it is not the local user name.
    pub user: Option<String>,
}

impl Instance {
    /// `user@address`, or the bare address when there is no login user.
    pub fn ssh_host(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.address),
            None => self.address.clone(),
        }
    }
}

/// Creates instances and waits until they are initialized.
pub trait Provisioner: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Create an instance of `machine_type`, wait for it, return its address.
    fn provision(&self, machine_type: &str) -> Result<Instance>;
}

/// Settings for every provider.
#[derive(Debug, Clone, Default)]
pub struct CloudSettings {
    /// Hetzner settings.
    pub hetzner: HetznerSettings,
    /// AWS settings.
    pub aws: AwsSettings,
}

/// Build the real provisioner for `cloud`.
pub fn provisioner(cloud: Cloud, settings: &CloudSettings) -> Result<Box<dyn Provisioner>> {
    match cloud {
        Cloud::Hetzner => Ok(Box::new(HetznerProvisioner::new(settings.hetzner.clone())?)),
        Cloud::Aws => Ok(Box::new(AwsProvisioner::new(settings.aws.clone())?)),
    }
}
