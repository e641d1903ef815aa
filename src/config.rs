use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::paths;
use cloudkit::{AwsSettings, CloudSettings, HetznerSettings};
use remotekit::{ExecutorSettings, RetryConfig, SshOptions};

// ============================================================================
// Buddy Config
// ============================================================================

/// `config.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuddyConfig {
    pub defaults: Defaults,
    pub ssh: SshSection,
    pub slurm: SlurmSection,
    pub hetzner: HetznerSection,
    pub aws: AwsSection,
    pub docker: DockerSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    /// Environment modules loaded before the run
    pub modules: Vec<String>,
    /// Conda environment on the target
    pub conda_env: String,
    /// Concurrent launches
    pub parallelism: usize,
    /// Git remote the snapshot is pushed to
    pub remote: String,
    /// Tracker credential copied to targets that lack one
    pub credential_file: Option<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            modules: vec!["python/3.7".to_string(), "pytorch/1.7".to_string()],
            conda_env: "base".to_string(),
            parallelism: 3,
            remote: "origin".to_string(),
            credential_file: Some("~/.netrc".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSection {
    pub connect_timeout_secs: u64,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub forward_agent: bool,
    pub batch_mode: bool,
}

impl Default for SshSection {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            retries: 10,
            retry_delay_secs: 5,
            forward_agent: true,
            batch_mode: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlurmSection {
    /// Parent of the scripts folder, expanded by the remote shell
    pub scratch_dir: String,
}

impl Default for SlurmSection {
    fn default() -> Self {
        Self {
            scratch_dir: remotekit::executor::DEFAULT_SCRATCH_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HetznerSection {
    pub image: String,
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Default for HetznerSection {
    fn default() -> Self {
        Self {
            image: cloudkit::hetzner::DEFAULT_IMAGE.to_string(),
            api_base: cloudkit::hetzner::DEFAULT_API_BASE.to_string(),
            location: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsSection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_name: Option<String>,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSection {
    pub image_tag: String,
}

impl Default for DockerSection {
    fn default() -> Self {
        Self {
            image_tag: remotekit::executor::DEFAULT_DOCKER_IMAGE.to_string(),
        }
    }
}

impl BuddyConfig {
    /// Load the user config; a missing file means defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_file()?)
    }

    /// Load from `path`; a missing file means defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Parse TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        if config.defaults.parallelism == 0 {
            anyhow::bail!("defaults.parallelism must be at least 1");
        }
        Ok(config)
    }

    /// Write to `path`, creating the parent directory.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_toml()?)
            .with_context(|| format!("Could not write {}", path.display()))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Could not serialize config")
    }

    /// Expanded credential file path.
    pub fn credential_file(&self) -> Option<PathBuf> {
        self.defaults
            .credential_file
            .as_deref()
            .filter(|p| !p.is_empty())
            .map(paths::expand)
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: Duration::from_secs(self.ssh.connect_timeout_secs),
            forward_agent: self.ssh.forward_agent,
            batch_mode: self.ssh.batch_mode,
            retry: RetryConfig::fixed(
                self.ssh.retries.max(1),
                Duration::from_secs(self.ssh.retry_delay_secs),
            ),
        }
    }

    pub fn cloud_settings(&self) -> CloudSettings {
        CloudSettings {
            hetzner: HetznerSettings {
                image: self.hetzner.image.clone(),
                api_base: self.hetzner.api_base.clone(),
                location: self.hetzner.location.clone(),
                ..HetznerSettings::default()
            },
            aws: AwsSettings {
                region: self.aws.region.clone(),
                key_name: self.aws.key_name.clone(),
                security_group_ids: self.aws.security_group_ids.clone(),
            },
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            credential_file: self.credential_file(),
            scratch_dir: self.slurm.scratch_dir.clone(),
            docker_image: self.docker.image_tag.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_config_is_default() {
        assert_eq!(BuddyConfig::parse("").unwrap(), BuddyConfig::default());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let config = BuddyConfig::parse(
            r#"
            [defaults]
            conda_env = "research"

            [ssh]
            retries = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.defaults.conda_env, "research");
        assert_eq!(config.defaults.parallelism, 3);
        assert_eq!(config.defaults.modules, vec!["python/3.7", "pytorch/1.7"]);
        assert_eq!(config.ssh.retries, 3);
        assert_eq!(config.ssh.retry_delay_secs, 5);
        assert_eq!(config.slurm.scratch_dir, "${SCRATCH:-$HOME}");
    }

    #[test]
    fn test_zero_parallelism_rejected() {
        assert!(BuddyConfig::parse("[defaults]\nparallelism = 0\n").is_err());
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(BuddyConfig::parse("[ssh]\nretries = \"many\"\n").is_err());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = BuddyConfig::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, BuddyConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = BuddyConfig::default();
        config.aws.region = Some("eu-west-1".to_string());
        config.docker.image_tag = "lab/base:gpu".to_string();

        config.save_to(&path).unwrap();
        assert_eq!(BuddyConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_ssh_options() {
        let mut config = BuddyConfig::default();
        config.ssh.retries = 0;
        config.ssh.forward_agent = false;

        let options = config.ssh_options();
        assert_eq!(options.retry.max_attempts, 1);
        assert_eq!(options.retry.base_delay, Duration::from_secs(5));
        assert_eq!(options.connect_timeout, Duration::from_secs(10));
        assert!(!options.forward_agent);
    }

    #[test]
    fn test_executor_settings() {
        let mut config = BuddyConfig::default();
        config.defaults.credential_file = Some("/etc/buddy/netrc".to_string());
        let settings = config.executor_settings();
        assert_eq!(settings.credential_file, Some(PathBuf::from("/etc/buddy/netrc")));
        assert_eq!(settings.docker_image, "buddy-base-cpu:latest");

        config.defaults.credential_file = Some(String::new());
        assert_eq!(config.executor_settings().credential_file, None);
    }

    #[test]
    fn test_cloud_settings() {
        let mut config = BuddyConfig::default();
        config.aws.security_group_ids = vec!["sg-1".to_string()];
        config.hetzner.location = Some("fsn1".to_string());

        let cloud = config.cloud_settings();
        assert_eq!(cloud.aws.security_group_ids, vec!["sg-1"]);
        assert_eq!(cloud.hetzner.location.as_deref(), Some("fsn1"));
        assert_eq!(cloud.hetzner.image, "ubuntu-22.04");
    }
}
