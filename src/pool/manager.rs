use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::allocator::Allocator;
use super::capacity::CapacityGuard;
use super::error::{CollaboratorContext, PoolError, Result};
use super::provisioner::{InFlight, Provisioner};
use super::reclaimer::{ReclaimReport, Reclaimer, Teardown};
use crate::bitbucket::ApplicationApi;
use crate::docker::{ContainerRuntime, RuntimeContainer};
use crate::shared::config::Config;
use crate::shared::models::Member;

/// Entry point for everything that touches the pool: the REST handlers, the
/// reclaim loop and the bootstrap task share one instance.
pub struct PoolManager {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    capacity: Arc<CapacityGuard>,
    provisioner: Arc<Provisioner>,
    allocator: Allocator,
    reclaimer: Reclaimer,
}

impl PoolManager {
    pub fn new(
        config: Arc<Config>,
        runtime: Arc<dyn ContainerRuntime>,
        app: Arc<dyn ApplicationApi>,
    ) -> Self {
        let capacity = Arc::new(CapacityGuard::new(runtime.clone(), config.prefix.clone()));
        let in_flight = Arc::new(InFlight::default());
        let provisioner = Arc::new(Provisioner::new(
            config.clone(),
            runtime.clone(),
            app,
            capacity.clone(),
            in_flight.clone(),
        ));
        let allocator = Allocator::new(
            config.clone(),
            runtime.clone(),
            provisioner.clone(),
            in_flight,
        );
        let reclaimer = Reclaimer::new(runtime.clone(), config.prefix.clone());

        Self {
            config,
            runtime,
            capacity,
            provisioner,
            allocator,
            reclaimer,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn member(&self, container: &RuntimeContainer) -> Member {
        Member::from_container(container, &self.config)
    }

    pub async fn create_network(&self) -> Result<()> {
        let network = &self.config.pool.network;
        self.runtime
            .ensure_network(network)
            .await
            .with_collaborator(|| format!("unable to create network: {network}"))
    }

    pub async fn list_all(&self) -> Result<Vec<Member>> {
        let prefix = &self.config.prefix;
        let containers = self
            .runtime
            .list_containers(prefix)
            .await
            .with_collaborator(|| format!("unable to get containers by prefix: {prefix}"))?;
        Ok(containers.iter().map(|c| self.member(c)).collect())
    }

    /// Looks up a pool member by its exact container id. Containers outside
    /// the pool prefix are reported as missing.
    async fn find_member(&self, id: &str) -> Result<RuntimeContainer> {
        self.runtime
            .get_container(id)
            .await
            .with_collaborator(|| format!("unable to get container, container_id: {id}"))?
            .filter(|container| container.name.contains(&self.config.prefix))
            .ok_or_else(|| PoolError::NotFound(id.to_string()))
    }

    pub async fn get_by_id(&self, id: &str) -> Result<Member> {
        let container = self.find_member(id).await?;
        Ok(self.member(&container))
    }

    /// Tears down one member regardless of its claim.
    pub async fn remove_by_id(&self, id: &str) -> Result<()> {
        let container = self.find_member(id).await?;

        match self.reclaimer.teardown(&container).await? {
            Teardown::Skipped(state) => Err(PoolError::UnexpectedState {
                id: id.to_string(),
                state,
            }),
            _ => Ok(()),
        }
    }

    /// Provisions a member and leaves it unclaimed.
    pub async fn create_explicit(&self, cancel: &CancellationToken) -> Result<Member> {
        let container = self.provisioner.provision(cancel).await?;
        Ok(self.member(&container))
    }

    /// Claims a free member, provisioning one if needed.
    pub async fn allocate(&self, cancel: &CancellationToken) -> Result<Member> {
        let container = self.allocator.get_or_provision(cancel).await?;
        Ok(self.member(&container))
    }

    /// Provisions members until the pool holds `target` containers. Returns
    /// how many were created.
    pub async fn ensure_initial(&self, target: usize, cancel: &CancellationToken) -> Result<usize> {
        let current = self
            .capacity
            .count_matching()
            .await
            .map_err(|e| match e {
                PoolError::Collaborator { cause, .. } => PoolError::Collaborator {
                    context: "unable to check initial number of containers".to_string(),
                    cause,
                },
                other => other,
            })?;
        if current >= target {
            info!(current, target, "Pool already holds the initial number of containers");
            return Ok(0);
        }

        let missing = target - current;
        info!(current, target, "Creating {} initial containers", missing);

        let results = join_all((0..missing).map(|_| self.provisioner.provision(cancel))).await;

        let mut created = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(container) => {
                    info!(container_id = %container.id, "Initial container ready");
                    created += 1;
                }
                Err(e) => {
                    warn!("Unable to create initial container: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(created),
        }
    }

    pub async fn reclaim_expired(&self) -> Result<ReclaimReport> {
        self.reclaimer.reclaim_expired().await
    }
}
