use chrono::{Local, TimeDelta};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::error::{CollaboratorContext, PoolError, Result};
use super::naming;
use super::provisioner::{InFlight, Provisioner};
use crate::docker::{ContainerRuntime, RuntimeContainer};
use crate::shared::config::Config;

/// Hands out pool members. Claiming renames the container, so the claim
/// survives restarts of this process.
pub struct Allocator {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    provisioner: Arc<Provisioner>,
    in_flight: Arc<InFlight>,
    claim_lock: Mutex<()>,
}

impl Allocator {
    pub fn new(
        config: Arc<Config>,
        runtime: Arc<dyn ContainerRuntime>,
        provisioner: Arc<Provisioner>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            config,
            runtime,
            provisioner,
            in_flight,
            claim_lock: Mutex::new(()),
        }
    }

    /// First unclaimed member that is not still being provisioned. The
    /// container state is not considered.
    pub async fn get_free(&self) -> Result<Option<RuntimeContainer>> {
        let prefix = &self.config.prefix;
        let containers = self
            .runtime
            .list_containers(prefix)
            .await
            .with_collaborator(|| format!("unable to get containers by prefix: {prefix}"))?;

        Ok(containers.into_iter().find(|container| {
            naming::is_unclaimed(&container.name) && !self.in_flight.contains(&container.name)
        }))
    }

    /// Renames `container` to its allocated form with an expiry one lease
    /// from now and returns the container as the runtime reports it after
    /// the rename.
    pub async fn claim(&self, container: RuntimeContainer) -> Result<RuntimeContainer> {
        let lease = TimeDelta::from_std(self.config.pool.lease())
            .collaborator("lease duration is out of range")?;
        let expiry = Local::now().naive_local() + lease;
        let name = naming::encode_claim(&container.name, expiry);

        self.runtime
            .rename_container(&container.id, &name)
            .await
            .with_collaborator(|| {
                format!("unable to rename container, container_id: {}", container.id)
            })?;

        info!(container_id = %container.id, name = %name, "Container allocated");

        self.runtime
            .get_container(&container.id)
            .await
            .with_collaborator(|| {
                format!("unable to get container, container_id: {}", container.id)
            })?
            .ok_or(PoolError::NotFound(container.id))
    }

    /// Finds and claims a free member. Concurrent callers never receive the
    /// same member.
    pub async fn claim_free(&self) -> Result<Option<RuntimeContainer>> {
        let _claim = self.claim_lock.lock().await;
        match self.get_free().await? {
            Some(container) => Ok(Some(self.claim(container).await?)),
            None => Ok(None),
        }
    }

    /// Claims a free member, provisioning one when none is available.
    pub async fn get_or_provision(&self, cancel: &CancellationToken) -> Result<RuntimeContainer> {
        if let Some(container) = self.claim_free().await? {
            return Ok(container);
        }

        info!("No free container, creating a new one");
        let (container, _held) = self.provisioner.provision_held(cancel).await?;

        let _claim = self.claim_lock.lock().await;
        self.claim(container).await
    }
}
