//! AWS EC2 provisioner.
//!
//! Drives the `aws` CLI with `--output json` instead of linking an SDK, the
//! same way the other backends shell out to their tools. Response parsing is
//! kept in small pure functions so it can be tested without an account.

use crate::error::{Error, Result};
use crate::{Instance, Provisioner};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::process::Command;

/// Default region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Image description filter (latest Canonical Ubuntu LTS).
pub const UBUNTU_IMAGE_FILTER: &str = "*Canonical, Ubuntu, 22.04 LTS*";

/// Value of the `Name` tag put on launched instances.
pub const INSTANCE_NAME_TAG: &str = "experiment-buddy";

/// Login user of the Ubuntu images.
pub const LOGIN_USER: &str = "ubuntu";

/// Settings for [`AwsProvisioner`].
#[derive(Debug, Clone, Default)]
pub struct AwsSettings {
    /// Region (defaults to [`DEFAULT_REGION`]).
    pub region: Option<String>,
    /// EC2 key pair name used for SSH login.
    pub key_name: Option<String>,
    /// Security groups; must allow inbound SSH.
    pub security_group_ids: Vec<String>,
}

/// Provisions EC2 instances through the `aws` CLI.
pub struct AwsProvisioner {
    aws: PathBuf,
    region: String,
    settings: AwsSettings,
}

impl AwsProvisioner {
    /// Create a provisioner; fails if the `aws` CLI is not installed.
    pub fn new(settings: AwsSettings) -> Result<Self> {
        let aws = which::which("aws").map_err(|_| Error::CliNotFound("aws"))?;
        let region = settings
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Ok(Self {
            aws,
            region,
            settings,
        })
    }

    /// Run `aws ec2 <args> --region <region> --output json`.
    fn ec2(&self, args: &[&str]) -> Result<Value> {
        let output = self.ec2_raw(args)?;
        if output.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&output)?)
    }

    fn ec2_raw(&self, args: &[&str]) -> Result<String> {
        let command = format!("aws ec2 {}", args.join(" "));
        log::debug!("{command}");
        let output = Command::new(&self.aws)
            .arg("ec2")
            .args(args)
            .args(["--region", &self.region, "--output", "json"])
            .output()?;

        if !output.status.success() {
            return Err(Error::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn supported_architectures(&self, machine_type: &str) -> Result<Vec<String>> {
        let response = self
            .ec2(&["describe-instance-types", "--instance-types", machine_type])
            .map_err(|e| match e {
                Error::CommandFailed { .. } => Error::MachineTypeNotFound(machine_type.to_string()),
                other => other,
            })?;
        parse_architectures(&response, machine_type)
    }

    fn latest_image(&self, machine_type: &str, architectures: &[String]) -> Result<String> {
        let filters = json!([
            { "Name": "description", "Values": [UBUNTU_IMAGE_FILTER] },
            { "Name": "architecture", "Values": architectures },
        ])
        .to_string();
        let response = self.ec2(&[
            "describe-images",
            "--owners",
            "amazon",
            "--filters",
            &filters,
        ])?;
        select_latest_image(&response).ok_or_else(|| Error::ImageNotFound(machine_type.to_string()))
    }

    fn run_instance(&self, machine_type: &str, image_id: &str) -> Result<String> {
        let tags = json!([{
            "ResourceType": "instance",
            "Tags": [{ "Key": "Name", "Value": INSTANCE_NAME_TAG }],
        }])
        .to_string();

        let mut args = vec![
            "run-instances",
            "--image-id",
            image_id,
            "--instance-type",
            machine_type,
            "--count",
            "1",
            "--instance-initiated-shutdown-behavior",
            "terminate",
            "--tag-specifications",
            &tags,
        ];
        if let Some(key_name) = &self.settings.key_name {
            args.extend(["--key-name", key_name.as_str()]);
        }
        if !self.settings.security_group_ids.is_empty() {
            args.push("--security-group-ids");
            args.extend(self.settings.security_group_ids.iter().map(String::as_str));
        }

        let response = self.ec2(&args)?;
        parse_instance_id(&response)
    }
}

impl Provisioner for AwsProvisioner {
    fn name(&self) -> &'static str {
        "aws"
    }

    fn provision(&self, machine_type: &str) -> Result<Instance> {
        let architectures = self.supported_architectures(machine_type)?;
        log::info!("{machine_type} supports {}", architectures.join(", "));

        let image_id = self.latest_image(machine_type, &architectures)?;
        log::info!("Selected image {image_id}");

        let instance_id = self.run_instance(machine_type, &image_id)?;
        log::info!("Launched {instance_id}, waiting until it is running...");

        self.ec2_raw(&["wait", "instance-running", "--instance-ids", &instance_id])
            .map_err(|e| match e {
                Error::CommandFailed { .. } => Error::Timeout {
                    what: format!("instance {instance_id} to start"),
                },
                other => other,
            })?;

        let response = self.ec2(&["describe-instances", "--instance-ids", &instance_id])?;
        let address = parse_public_address(&response)?;

        Ok(Instance {
            id: instance_id,
            address,
            machine_type: machine_type.to_string(),
            user: Some(LOGIN_USER.to_string()),
        })
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// `InstanceTypes[0].ProcessorInfo.SupportedArchitectures`.
pub fn parse_architectures(response: &Value, machine_type: &str) -> Result<Vec<String>> {
    let architectures: Vec<String> = response["InstanceTypes"]
        .as_array()
        .and_then(|types| types.first())
        .and_then(|t| t["ProcessorInfo"]["SupportedArchitectures"].as_array())
        .map(|archs| {
            archs
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if architectures.is_empty() {
        return Err(Error::MachineTypeNotFound(machine_type.to_string()));
    }
    Ok(architectures)
}

/// Id of the most recently created image in a `describe-images` response.
pub fn select_latest_image(response: &Value) -> Option<String> {
    response["Images"]
        .as_array()?
        .iter()
        .filter_map(|image| {
            Some((
                image["CreationDate"].as_str()?,
                image["ImageId"].as_str()?,
            ))
        })
        // ISO 8601 timestamps sort lexicographically
        .max_by(|a, b| a.0.cmp(b.0))
        .map(|(_, id)| id.to_string())
}

/// `Instances[0].InstanceId` from a `run-instances` response.
pub fn parse_instance_id(response: &Value) -> Result<String> {
    response["Instances"]
        .as_array()
        .and_then(|instances| instances.first())
        .and_then(|i| i["InstanceId"].as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidResponse("run-instances returned no instance".to_string()))
}

/// Public DNS name (or IP) of the single instance in a `describe-instances` response.
pub fn parse_public_address(response: &Value) -> Result<String> {
    let instance = response["Reservations"]
        .as_array()
        .and_then(|r| r.first())
        .and_then(|r| r["Instances"].as_array())
        .and_then(|i| i.first())
        .ok_or_else(|| Error::InvalidResponse("describe-instances returned nothing".into()))?;

    ["PublicDnsName", "PublicIpAddress"]
        .iter()
        .filter_map(|key| instance[*key].as_str())
        .find(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidResponse("instance has no public address".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_architectures() {
        let response = json!({
            "InstanceTypes": [{
                "InstanceType": "t3.large",
                "ProcessorInfo": { "SupportedArchitectures": ["x86_64"] }
            }]
        });
        assert_eq!(
            parse_architectures(&response, "t3.large").unwrap(),
            vec!["x86_64"]
        );
    }

    #[test]
    fn test_parse_architectures_unknown_type() {
        let response = json!({ "InstanceTypes": [] });
        let err = parse_architectures(&response, "t9.mega").unwrap_err();
        assert!(matches!(err, Error::MachineTypeNotFound(t) if t == "t9.mega"));
    }

    #[test]
    fn test_select_latest_image() {
        let response = json!({
            "Images": [
                { "ImageId": "ami-old", "CreationDate": "2023-01-10T10:00:00.000Z" },
                { "ImageId": "ami-new", "CreationDate": "2024-06-01T08:30:00.000Z" },
                { "ImageId": "ami-mid", "CreationDate": "2023-11-20T00:00:00.000Z" }
            ]
        });
        assert_eq!(select_latest_image(&response).as_deref(), Some("ami-new"));
        assert_eq!(select_latest_image(&json!({ "Images": [] })), None);
    }

    #[test]
    fn test_parse_instance_id() {
        let response = json!({ "Instances": [{ "InstanceId": "i-0abc" }] });
        assert_eq!(parse_instance_id(&response).unwrap(), "i-0abc");
        assert!(parse_instance_id(&json!({})).is_err());
    }

    #[test]
    fn test_parse_public_address_prefers_dns() {
        let response = json!({
            "Reservations": [{ "Instances": [{
                "PublicDnsName": "ec2-1-2-3-4.compute-1.amazonaws.com",
                "PublicIpAddress": "1.2.3.4"
            }]}]
        });
        assert_eq!(
            parse_public_address(&response).unwrap(),
            "ec2-1-2-3-4.compute-1.amazonaws.com"
        );
    }

    #[test]
    fn test_parse_public_address_falls_back_to_ip() {
        let response = json!({
            "Reservations": [{ "Instances": [{
                "PublicDnsName": "",
                "PublicIpAddress": "1.2.3.4"
            }]}]
        });
        assert_eq!(parse_public_address(&response).unwrap(), "1.2.3.4");
    }
}
