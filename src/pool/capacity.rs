use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use super::error::{CollaboratorContext, Result};
use crate::docker::ContainerRuntime;

/// Counts pool containers against a ceiling.
///
/// Counting includes stopped containers the reclaimer has not removed yet.
/// The count is only advisory against other processes sharing the Docker
/// daemon; inside this process, callers that hold [`CapacityGuard::reserve`]
/// across the check and the create cannot overshoot each other.
pub struct CapacityGuard {
    runtime: Arc<dyn ContainerRuntime>,
    prefix: String,
    reservation: Mutex<()>,
}

impl CapacityGuard {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, prefix: impl Into<String>) -> Self {
        Self {
            runtime,
            prefix: prefix.into(),
            reservation: Mutex::new(()),
        }
    }

    pub async fn count_matching(&self) -> Result<usize> {
        let containers = self
            .runtime
            .list_containers(&self.prefix)
            .await
            .with_collaborator(|| format!("unable to get containers by prefix: {}", self.prefix))?;
        Ok(containers.len())
    }

    /// `(current >= ceiling, current)`.
    pub async fn exceeds(&self, ceiling: usize) -> Result<(bool, usize)> {
        let current = self.count_matching().await?;
        debug!(prefix = %self.prefix, current, ceiling, "Checked pool capacity");
        Ok((current >= ceiling, current))
    }

    /// Serializes check-then-create sections.
    pub async fn reserve(&self) -> MutexGuard<'_, ()> {
        self.reservation.lock().await
    }
}
