use bollard::container::{Config, NetworkingConfig};
use bollard::models::{
    ContainerSummary, EndpointSettings, HostConfig, Mount, MountTypeEnum, PortBinding,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Port the application serves HTTP on inside the container.
pub const APP_HTTP_PORT: u16 = 7990;
/// Port the application serves git-over-ssh on inside the container.
pub const APP_SSH_PORT: u16 = 7999;
/// Where the application keeps its home directory.
pub const APP_DATA_PATH: &str = "/var/atlassian/application-data/bitbucket";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown,
}

impl From<&str> for ContainerState {
    fn from(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "created" => ContainerState::Created,
            "running" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "removing" => ContainerState::Removing,
            "exited" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            _ => ContainerState::Unknown,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Removing => "removing",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// The runtime's view of a container, reduced to what the pool needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContainer {
    pub id: String,
    /// Name without the leading `/` Docker reports.
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub http_port: Option<u16>,
    pub ssh_port: Option<u16>,
    /// Named volumes mounted into the container.
    pub volumes: Vec<String>,
}

impl RuntimeContainer {
    /// Returns `None` for summaries without an id or a name.
    pub fn from_summary(summary: ContainerSummary) -> Option<Self> {
        let id = summary.id?;
        let name = summary
            .names?
            .into_iter()
            .next()?
            .trim_start_matches('/')
            .to_string();

        let published = |private: u16| {
            summary
                .ports
                .as_deref()
                .unwrap_or_default()
                .iter()
                .find(|port| port.private_port == private && port.public_port.is_some())
                .and_then(|port| port.public_port)
        };

        let volumes = summary
            .mounts
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|mount| mount.name.clone())
            .collect();

        Some(Self {
            http_port: published(APP_HTTP_PORT),
            ssh_port: published(APP_SSH_PORT),
            id,
            name,
            image: summary.image.unwrap_or_default(),
            state: summary
                .state
                .as_deref()
                .map(ContainerState::from)
                .unwrap_or(ContainerState::Unknown),
            volumes,
        })
    }
}

/// Everything needed to create one pool member container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub volume: String,
    pub http_port: u16,
    pub ssh_port: u16,
    pub network: String,
    pub env: Vec<String>,
}

impl ContainerSpec {
    pub fn to_config(&self) -> Config<String> {
        let binding = |port: u16| {
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(port.to_string()),
            }])
        };

        let mut port_bindings = HashMap::new();
        port_bindings.insert(format!("{APP_HTTP_PORT}/tcp"), binding(self.http_port));
        port_bindings.insert(format!("{APP_SSH_PORT}/tcp"), binding(self.ssh_port));

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(format!("{APP_HTTP_PORT}/tcp"), HashMap::new());
        exposed_ports.insert(format!("{APP_SSH_PORT}/tcp"), HashMap::new());

        let host_config = HostConfig {
            mounts: Some(vec![Mount {
                target: Some(APP_DATA_PATH.to_string()),
                source: Some(self.volume.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(false),
                ..Default::default()
            }]),
            port_bindings: Some(port_bindings),
            network_mode: Some(self.network.clone()),
            ..Default::default()
        };

        let mut endpoints_config = HashMap::new();
        endpoints_config.insert(self.network.clone(), EndpointSettings::default());

        Config {
            image: Some(self.image.clone()),
            env: Some(self.env.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            networking_config: Some(NetworkingConfig { endpoints_config }),
            ..Default::default()
        }
    }
}
