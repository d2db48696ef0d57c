use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    RenameContainerOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::network::{CreateNetworkOptions, ListNetworksOptions};
use bollard::volume::RemoveVolumeOptions;
use bollard::{Docker, API_DEFAULT_VERSION};
use futures::stream::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, error, info};

use super::{ContainerRuntime, ContainerSpec, RuntimeContainer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    pub socket_path: Option<String>,
    pub stop_timeout_seconds: i64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            stop_timeout_seconds: 10,
        }
    }
}

pub struct DockerClient {
    docker: Docker,
    stop_timeout: i64,
}

impl DockerClient {
    pub async fn new(config: DockerConfig) -> Result<Self> {
        let docker = if let Some(socket) = config.socket_path {
            Docker::connect_with_socket(&socket, 120, &API_DEFAULT_VERSION)?
        } else {
            Docker::connect_with_local_defaults()?
        };

        let version = docker
            .version()
            .await
            .context("Docker daemon did not answer the version probe")?;

        info!(
            docker_version = %version.version.unwrap_or_default(),
            api_version = %version.api_version.unwrap_or_default(),
            "Docker daemon reachable"
        );

        Ok(Self {
            docker,
            stop_timeout: config.stop_timeout_seconds,
        })
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let networks = self
            .docker
            .list_networks(Some(ListNetworksOptions { filters }))
            .await
            .context("Failed to list networks")?;

        // the name filter is a substring match
        Ok(networks
            .iter()
            .any(|network| network.name.as_deref() == Some(name)))
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn ensure_network(&self, name: &str) -> Result<()> {
        if self.network_exists(name).await? {
            info!(network = %name, "Network with this name already exists");
            return Ok(());
        }

        let options = CreateNetworkOptions {
            name: name.to_string(),
            driver: "bridge".to_string(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_network(options)
            .await
            .with_context(|| format!("Failed to create network {name}"))?;

        info!(
            network = %name,
            network_id = ?response.id,
            "Network successfully created"
        );
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!(%image, "Pulling application image");

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);

        while let Some(step) = progress.next().await {
            let step = step.map_err(|e| {
                error!(%image, error = %e, "Image pull aborted");
                anyhow::anyhow!("Failed to pull image {image}: {e}")
            })?;
            if let (Some(status), Some(layer)) = (step.status.as_deref(), step.id.as_deref()) {
                debug!(%image, layer, status, "Pull progress");
            }
        }

        info!(%image, "Image is up to date");
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), spec.to_config())
            .await
            .with_context(|| format!("Failed to create container {}", spec.name))?;

        info!(
            container_id = %response.id,
            container_name = %spec.name,
            image = %spec.image,
            http_port = spec.http_port,
            ssh_port = spec.ssh_port,
            "Container created successfully"
        );
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .with_context(|| format!("Failed to start container {id}"))?;

        debug!(container_id = %id, "Container started");
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: self.stop_timeout,
        };

        self.docker
            .stop_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to stop container {id}"))?;

        info!(container_id = %id, timeout = self.stop_timeout, "Container stopped");
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            v: true,
            force: true,
            link: false,
        };

        self.docker
            .remove_container(id, Some(options))
            .await
            .with_context(|| format!("Failed to remove container {id}"))?;

        info!(container_id = %id, "Container removed along with anonymous volumes");
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.docker
            .remove_volume(name, Some(RemoveVolumeOptions { force: true }))
            .await
            .with_context(|| format!("Failed to remove volume {name}"))?;

        info!(volume = %name, "Volume removed");
        Ok(())
    }

    async fn rename_container(&self, id: &str, name: &str) -> Result<()> {
        self.docker
            .rename_container(id, RenameContainerOptions { name })
            .await
            .with_context(|| format!("Failed to rename container {id} to {name}"))?;

        info!(container_id = %id, new_name = %name, "Container renamed");
        Ok(())
    }

    async fn list_containers(&self, prefix: &str) -> Result<Vec<RuntimeContainer>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![prefix.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        Ok(summaries
            .into_iter()
            .filter_map(RuntimeContainer::from_summary)
            .filter(|container| container.name.contains(prefix))
            .collect())
    }

    async fn get_container(&self, id: &str) -> Result<Option<RuntimeContainer>> {
        let mut filters = HashMap::new();
        filters.insert("id".to_string(), vec![id.to_string()]);

        let options = ListContainersOptions::<String> {
            all: true,
            filters,
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        Ok(exact_id(
            summaries.into_iter().filter_map(RuntimeContainer::from_summary),
            id,
        ))
    }
}

/// Docker's `id` filter also matches id prefixes, so a short id could name an
/// unrelated container. Only an exact match counts.
fn exact_id(
    containers: impl IntoIterator<Item = RuntimeContainer>,
    id: &str,
) -> Option<RuntimeContainer> {
    containers.into_iter().find(|container| container.id == id)
}
