//! Hetzner Cloud provisioner.
//!
//! Talks to the Hetzner Cloud REST API directly. Servers are created with
//! every SSH key registered in the project, so the local agent can log in
//! as soon as the server's actions have finished.

use crate::error::{Error, Result};
use crate::{Instance, Provisioner};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "HCLOUD_TOKEN";

/// Default API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.hetzner.cloud/v1";

/// Default server image.
pub const DEFAULT_IMAGE: &str = "ubuntu-22.04";

/// Settings for [`HetznerProvisioner`].
#[derive(Debug, Clone)]
pub struct HetznerSettings {
    /// API token (usually from `HCLOUD_TOKEN`).
    pub token: Option<String>,
    /// Image name.
    pub image: String,
    /// API base URL.
    pub api_base: String,
    /// Optional location (e.g. `fsn1`).
    pub location: Option<String>,
    /// Delay between action polls.
    pub poll_interval: Duration,
    /// Maximum number of polls per action.
    pub max_polls: u32,
}

impl Default for HetznerSettings {
    fn default() -> Self {
        Self {
            token: std::env::var(TOKEN_ENV).ok(),
            image: DEFAULT_IMAGE.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            location: None,
            poll_interval: Duration::from_secs(2),
            max_polls: 150,
        }
    }
}

/// Provisions Hetzner Cloud servers.
pub struct HetznerProvisioner {
    agent: ureq::Agent,
    token: String,
    settings: HetznerSettings,
}

impl HetznerProvisioner {
    /// Create a provisioner; fails if no API token is available.
    pub fn new(settings: HetznerSettings) -> Result<Self> {
        let token = settings
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(Error::MissingToken {
                variable: TOKEN_ENV,
            })?;
        Ok(Self {
            agent: ureq::Agent::new_with_defaults(),
            token,
            settings,
        })
    }

    /// Get the current API base URL.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.settings.api_base
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.api_base.trim_end_matches('/'), path)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn ssh_key_names(&self) -> Result<Vec<String>> {
        let response: SshKeysResponse = self
            .agent
            .get(&self.url("ssh_keys"))
            .header("Authorization", &self.auth())
            .call()?
            .body_mut()
            .read_json()?;
        Ok(response.ssh_keys.into_iter().map(|k| k.name).collect())
    }

    fn create_server(&self, request: &CreateServerRequest) -> Result<CreateServerResponse> {
        let response = self
            .agent
            .post(&self.url("servers"))
            .header("Authorization", &self.auth())
            .send_json(request);

        match response {
            Ok(mut r) => Ok(r.body_mut().read_json()?),
            // Hetzner answers 404/422 for unknown server types
            Err(ureq::Error::StatusCode(404 | 422)) => {
                Err(Error::MachineTypeNotFound(request.server_type.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn wait_for_action(&self, mut action: Action) -> Result<()> {
        for _ in 0..self.settings.max_polls {
            match action.status.as_str() {
                "success" => return Ok(()),
                "error" => {
                    let message = action
                        .error
                        .map(|e| format!("{}: {}", e.code, e.message))
                        .unwrap_or_else(|| format!("action {} failed", action.command));
                    return Err(Error::Api {
                        provider: "Hetzner",
                        message,
                    });
                }
                _ => {
                    log::info!("Waiting for server action '{}'...", action.command);
                    thread::sleep(self.settings.poll_interval);
                    let response: ActionResponse = self
                        .agent
                        .get(&self.url(&format!("actions/{}", action.id)))
                        .header("Authorization", &self.auth())
                        .call()?
                        .body_mut()
                        .read_json()?;
                    action = response.action;
                }
            }
        }
        Err(Error::Timeout {
            what: format!("Hetzner action '{}'", action.command),
        })
    }
}

impl Provisioner for HetznerProvisioner {
    fn name(&self) -> &'static str {
        "hetzner"
    }

    fn provision(&self, machine_type: &str) -> Result<Instance> {
        let ssh_keys = self.ssh_key_names()?;
        if ssh_keys.is_empty() {
            log::warn!("No SSH keys registered in the Hetzner project; login may fail");
        }

        let request = CreateServerRequest {
            name: format!("buddy-{}", uuid::Uuid::new_v4().simple()),
            server_type: machine_type.to_string(),
            image: self.settings.image.clone(),
            ssh_keys,
            location: self.settings.location.clone(),
            start_after_create: true,
        };
        log::info!("Creating Hetzner server {} ({machine_type})", request.name);
        let response = self.create_server(&request)?;

        for action in response.pending_actions() {
            self.wait_for_action(action)?;
        }

        let address = response.server.public_net.ipv4.map(|v4| v4.ip).ok_or_else(|| {
            Error::InvalidResponse("server has no public IPv4 address".to_string())
        })?;

        Ok(Instance {
            id: response.server.id.to_string(),
            address,
            machine_type: machine_type.to_string(),
            user: Some("root".to_string()),
        })
    }
}

// =============================================================================
// Hetzner API types
// =============================================================================

#[derive(Debug, Serialize)]
struct CreateServerRequest {
    name: String,
    server_type: String,
    image: String,
    ssh_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
    start_after_create: bool,
}

#[derive(Debug, Deserialize)]
struct SshKeysResponse {
    ssh_keys: Vec<SshKey>,
}

#[derive(Debug, Deserialize)]
struct SshKey {
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateServerResponse {
    server: Server,
    action: Option<Action>,
    #[serde(default)]
    next_actions: Vec<Action>,
}

impl CreateServerResponse {
    fn pending_actions(&self) -> Vec<Action> {
        self.action
            .iter()
            .chain(self.next_actions.iter())
            .cloned()
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct Server {
    id: u64,
    public_net: PublicNet,
}

#[derive(Debug, Deserialize)]
struct PublicNet {
    ipv4: Option<Ipv4>,
}

#[derive(Debug, Deserialize)]
struct Ipv4 {
    ip: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Action {
    id: u64,
    command: String,
    status: String,
    error: Option<ActionError>,
}

#[derive(Debug, Clone, Deserialize)]
struct ActionError {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    action: Action,
}
