use anyhow::Result;
use tracing::info;

use super::{ContainerRuntime, RuntimeContainer};

/// Named volumes of `container` that belong to the pool.
pub fn pool_volumes<'a>(container: &'a RuntimeContainer, prefix: &str) -> Vec<&'a str> {
    container
        .volumes
        .iter()
        .map(String::as_str)
        .filter(|volume| volume.starts_with(&format!("{prefix}-volume-")))
        .collect()
}

/// Removes the pool volumes that were mounted into `container`. Call after
/// the container itself is gone, otherwise Docker refuses.
pub async fn remove_pool_volumes(
    runtime: &dyn ContainerRuntime,
    container: &RuntimeContainer,
    prefix: &str,
) -> Result<()> {
    for volume in pool_volumes(container, prefix) {
        runtime.remove_volume(volume).await?;
        info!(container_id = %container.id, volume = %volume, "Volume removed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::ContainerState;

    #[test]
    fn only_prefixed_volumes_are_selected() {
        let container = RuntimeContainer {
            id: "abc".into(),
            name: "bbpool-1234567---new".into(),
            image: String::new(),
            state: ContainerState::Exited,
            http_port: None,
            ssh_port: None,
            volumes: vec![
                "bbpool-volume-1500000".into(),
                "3f9c0d1e2a".into(),
                "other-volume-1".into(),
            ],
        };

        assert_eq!(pool_volumes(&container, "bbpool"), vec!["bbpool-volume-1500000"]);
    }
}
