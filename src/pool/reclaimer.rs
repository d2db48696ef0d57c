use chrono::{Local, NaiveDateTime, SubsecRound};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::{CollaboratorContext, PoolError, Result};
use super::naming;
use crate::docker::{remove_pool_volumes, ContainerRuntime, ContainerState, RuntimeContainer};
use crate::shared::models::MemberStatus;

/// Outcome of one reclamation pass, by container id.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReclaimReport {
    pub removed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    StoppedAndRemoved,
    Removed,
    Skipped(ContainerState),
}

/// Expiry stamps carry whole seconds, so the clock is truncated before
/// comparing. A lease ending at `10:00:00` is still valid at `10:00:00.9`.
pub fn is_expired(expiry: NaiveDateTime, now: NaiveDateTime) -> bool {
    now.trunc_subsecs(0) > expiry
}

pub struct Reclaimer {
    runtime: Arc<dyn ContainerRuntime>,
    prefix: String,
}

impl Reclaimer {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, prefix: impl Into<String>) -> Self {
        Self {
            runtime,
            prefix: prefix.into(),
        }
    }

    /// Stops and removes `container` along with its pool volume. The state is
    /// read fresh from the runtime; containers in transitional states are
    /// left alone.
    pub async fn teardown(&self, container: &RuntimeContainer) -> Result<Teardown> {
        let id = &container.id;
        let current = self
            .runtime
            .get_container(id)
            .await
            .with_collaborator(|| format!("unable to get container, container_id: {id}"))?
            .ok_or_else(|| PoolError::NotFound(id.clone()))?;

        let outcome = match current.state {
            ContainerState::Running => {
                self.runtime
                    .stop_container(id)
                    .await
                    .with_collaborator(|| format!("unable to stop container, container_id: {id}"))?;
                info!(container_id = %id, "Container stopped");
                Teardown::StoppedAndRemoved
            }
            ContainerState::Exited | ContainerState::Created | ContainerState::Dead => {
                Teardown::Removed
            }
            state => return Ok(Teardown::Skipped(state)),
        };

        self.runtime
            .remove_container(id)
            .await
            .with_collaborator(|| format!("unable to remove container, container_id: {id}"))?;
        info!(container_id = %id, "Container removed");

        remove_pool_volumes(self.runtime.as_ref(), &current, &self.prefix)
            .await
            .with_collaborator(|| format!("unable to remove volume, container_id: {id}"))?;

        Ok(outcome)
    }

    /// Tears down every allocated member whose lease has run out. One bad
    /// member does not stop the pass.
    pub async fn reclaim_expired(&self) -> Result<ReclaimReport> {
        let prefix = &self.prefix;
        let containers = self
            .runtime
            .list_containers(prefix)
            .await
            .with_collaborator(|| format!("unable to get containers by prefix: {prefix}"))?;

        let now = Local::now().naive_local();
        let mut report = ReclaimReport::default();

        for container in &containers {
            if naming::derive_status(&container.name) != MemberStatus::Allocated {
                continue;
            }

            let expiry = match naming::decode_expiry(&container.name) {
                Ok(expiry) => expiry,
                Err(e) => {
                    warn!(container_id = %container.id, "Skipping container: {}", e);
                    report.skipped.push(container.id.clone());
                    continue;
                }
            };

            if !is_expired(expiry, now) {
                debug!(container_id = %container.id, %expiry, "Lease still valid");
                continue;
            }

            info!(container_id = %container.id, %expiry, "Lease expired, removing container");
            match self.teardown(container).await {
                Ok(Teardown::Skipped(state)) => {
                    warn!(
                        container_id = %container.id,
                        %state,
                        "Unexpected container state, skipping"
                    );
                    report.skipped.push(container.id.clone());
                }
                Ok(_) => report.removed.push(container.id.clone()),
                Err(e) => {
                    error!(container_id = %container.id, "Failed to reclaim container: {}", e);
                    report.failed.push(container.id.clone());
                }
            }
        }

        Ok(report)
    }
}
