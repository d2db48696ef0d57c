mod client;
mod container;
mod volume;

pub use client::{DockerClient, DockerConfig};
pub use container::{ContainerSpec, ContainerState, RuntimeContainer};
pub use volume::remove_pool_volumes;

use anyhow::Result;
use async_trait::async_trait;

/// The container operations the pool relies on. Every call acts on the
/// runtime directly; nothing is cached between calls.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Creates a bridge network called `name` unless one exists.
    async fn ensure_network(&self, name: &str) -> Result<()>;
    async fn pull_image(&self, image: &str) -> Result<()>;
    /// Returns the id of the created container.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start_container(&self, id: &str) -> Result<()>;
    async fn stop_container(&self, id: &str) -> Result<()>;
    /// Force-removes the container together with its anonymous volumes.
    async fn remove_container(&self, id: &str) -> Result<()>;
    async fn remove_volume(&self, name: &str) -> Result<()>;
    async fn rename_container(&self, id: &str, name: &str) -> Result<()>;
    /// All containers, in any state, whose name contains `prefix`.
    async fn list_containers(&self, prefix: &str) -> Result<Vec<RuntimeContainer>>;
    async fn get_container(&self, id: &str) -> Result<Option<RuntimeContainer>>;
}
