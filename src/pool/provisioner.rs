use std::collections::HashSet;
use std::future::Future;
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use super::capacity::CapacityGuard;
use super::error::{CollaboratorContext, PoolError, Result};
use super::naming;
use crate::bitbucket::{ApplicationApi, StartupProbe};
use crate::docker::{remove_pool_volumes, ContainerRuntime, ContainerSpec, RuntimeContainer};
use crate::shared::config::Config;

pub const APPLICATION_IMAGE: &str = "atlassian/bitbucket-server";
pub const ADDON_KEY: &str = "io.reconquest.snake";

/// Maps the configured version onto an image reference. Accepts `latest` or
/// two to three dot-separated numeric components.
pub fn resolve_image(version: &str) -> Result<String> {
    if version == "latest" {
        return Ok(format!("{APPLICATION_IMAGE}:latest"));
    }

    let parts: Vec<&str> = version.split('.').collect();
    let numeric = parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()));
    if numeric && (2..=3).contains(&parts.len()) {
        return Ok(format!("{APPLICATION_IMAGE}:{version}"));
    }

    Err(PoolError::InvalidVersion(version.to_string()))
}

/// Binds two ephemeral localhost ports and releases them, returning
/// `(http, ssh)`. Both listeners are held together so the ports differ.
fn reserve_ports() -> std::io::Result<(u16, u16)> {
    let http = TcpListener::bind(("127.0.0.1", 0))?;
    let ssh = TcpListener::bind(("127.0.0.1", 0))?;
    Ok((http.local_addr()?.port(), ssh.local_addr()?.port()))
}

async fn cancellable<F: Future>(cancel: &CancellationToken, future: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PoolError::Cancelled),
        output = future => Ok(output),
    }
}

/// Names of members still being provisioned. The allocator never hands
/// these out.
#[derive(Debug, Default)]
pub struct InFlight {
    names: Mutex<HashSet<String>>,
}

impl InFlight {
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains(name)
    }

    pub fn hold(self: &Arc<Self>, name: &str) -> InFlightGuard {
        self.lock().insert(name.to_string());
        InFlightGuard {
            registry: Arc::clone(self),
            name: name.to_string(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.names.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Releases the in-flight mark on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlight>,
    name: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.name);
    }
}

pub struct Provisioner {
    config: Arc<Config>,
    runtime: Arc<dyn ContainerRuntime>,
    app: Arc<dyn ApplicationApi>,
    capacity: Arc<CapacityGuard>,
    in_flight: Arc<InFlight>,
}

impl Provisioner {
    pub fn new(
        config: Arc<Config>,
        runtime: Arc<dyn ContainerRuntime>,
        app: Arc<dyn ApplicationApi>,
        capacity: Arc<CapacityGuard>,
        in_flight: Arc<InFlight>,
    ) -> Self {
        Self {
            config,
            runtime,
            app,
            capacity,
            in_flight,
        }
    }

    /// Provisions a ready member and releases it to the pool.
    pub async fn provision(&self, cancel: &CancellationToken) -> Result<RuntimeContainer> {
        let (container, _held) = self.provision_held(cancel).await?;
        Ok(container)
    }

    /// Provisions a ready member that stays out of the allocator's reach
    /// until the returned guard is dropped.
    pub async fn provision_held(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(RuntimeContainer, InFlightGuard)> {
        let limit = self.config.pool.max_size;
        let (exceeded, current) = self
            .capacity
            .exceeds(limit)
            .await
            .map_err(|e| self.context(e, "unable to validate max number of created containers"))?;
        if exceeded {
            return Err(PoolError::CapacityExceeded { limit, current });
        }

        info!("Creating container");
        let image = resolve_image(&self.config.bitbucket.version)?;
        let name = naming::member_name(&self.config.prefix);
        let held = self.in_flight.hold(&name);

        info!("Receiving free http and ssh ports for new container");
        let (http_port, ssh_port) =
            reserve_ports().collaborator("unable to get free http and ssh ports for new container")?;

        cancellable(cancel, self.runtime.pull_image(&image))
            .await?
            .with_collaborator(|| format!("unable to pull image {image}"))?;

        let spec = ContainerSpec {
            name: name.clone(),
            image: image.clone(),
            volume: naming::volume_name(&self.config.prefix),
            http_port,
            ssh_port,
            network: self.config.pool.network.clone(),
            env: vec![
                format!(
                    "ELASTICSEARCH_ENABLED={}",
                    self.config.bitbucket.elastic_search_enabled
                ),
                format!(
                    "JVM_SUPPORT_RECOMMENDED_ARGS={}",
                    self.config.bitbucket.jvm_support_recommended_args
                ),
            ],
        };

        let id = {
            let _reservation = self.capacity.reserve().await;
            let (exceeded, current) = self.capacity.exceeds(limit).await?;
            if exceeded {
                return Err(PoolError::CapacityExceeded { limit, current });
            }
            self.runtime
                .create_container(&spec)
                .await
                .with_collaborator(|| format!("unable to create container, container_name: {name}"))?
        };

        match self.bring_up(&id, &spec, cancel).await {
            Ok(container) => Ok((container, held)),
            Err(err) => {
                warn!(container_id = %id, "Provisioning failed, discarding container: {}", err);
                self.discard(&id).await;
                Err(err)
            }
        }
    }

    async fn bring_up(
        &self,
        id: &str,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<RuntimeContainer> {
        info!("Starting container");
        self.runtime
            .start_container(id)
            .await
            .with_collaborator(|| format!("unable to start container, container_id: {id}"))?;

        let url = self.config.member_url(spec.http_port);
        self.wait_until_started(id, &url, &spec.image, cancel).await?;

        self.install_addon_and_license(&url, cancel)
            .await
            .map_err(|e| self.context(e, &format!("unable to set license, container_id: {id}")))?;

        self.runtime
            .get_container(id)
            .await
            .with_collaborator(|| format!("unable to get container from docker, container_id: {id}"))?
            .ok_or_else(|| PoolError::NotFound(id.to_string()))
    }

    /// Polls the readiness endpoint until the application reports `STARTED`,
    /// the startup timeout passes or `cancel` fires.
    async fn wait_until_started(
        &self,
        id: &str,
        url: &str,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(container_id = %id, "Validating startup status of a container");

        let started = Instant::now();
        let deadline = started + self.config.pool.startup_timeout();
        let poll = self.config.pool.startup_poll_interval();
        let mut message = String::new();

        loop {
            cancellable(cancel, sleep(poll)).await?;

            if Instant::now() >= deadline {
                return Err(PoolError::StillStarting {
                    id: id.to_string(),
                    waited: started.elapsed(),
                });
            }

            let probe = cancellable(cancel, self.app.startup_status(url))
                .await?
                .collaborator("unable to get container startup status")?;

            match probe {
                StartupProbe::Starting(reason) => {
                    trace!("{}/system/startup: {}", url, reason);
                }
                StartupProbe::Status(status) => {
                    if status.progress.message != message {
                        info!(
                            "bb: {} setup: {:3}% {} | {}",
                            image,
                            status.progress.percentage,
                            status.state.to_lowercase(),
                            status.progress.message
                        );
                        message = status.progress.message.clone();
                    }

                    if status.is_started() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn install_addon_and_license(&self, url: &str, cancel: &CancellationToken) -> Result<()> {
        info!("Receiving upm token");
        let token = cancellable(cancel, self.app.upm_token(url))
            .await?
            .with_collaborator(|| format!("unable to get upm token by url: {url}"))?;

        info!("Installing addon");
        let addon = &self.config.addon_path;
        let result = cancellable(cancel, self.app.install_addon(url, &token, addon))
            .await?
            .with_collaborator(|| format!("unable to install addon, addon_path: {}", addon.display()))?;
        info!("Addon successfully installed, result: {}", result);

        info!("Setting license for addon");
        let license_path = &self.config.license_path;
        let license = tokio::fs::read_to_string(license_path)
            .await
            .with_collaborator(|| format!("unable to read license file: {}", license_path.display()))?;

        cancellable(cancel, self.app.set_addon_license(url, ADDON_KEY, &license))
            .await?
            .with_collaborator(|| {
                format!("unable to set license for addon, license_path: {}", license_path.display())
            })?;

        info!("License successfully set");
        Ok(())
    }

    /// Best-effort removal of a half-provisioned container.
    async fn discard(&self, id: &str) {
        let container = match self.runtime.get_container(id).await {
            Ok(Some(container)) => container,
            Ok(None) => return,
            Err(e) => {
                warn!(container_id = %id, "Unable to look up failed container: {:#}", e);
                return;
            }
        };

        if let Err(e) = self.runtime.remove_container(id).await {
            warn!(container_id = %id, "Unable to remove failed container: {:#}", e);
            return;
        }
        if let Err(e) =
            remove_pool_volumes(self.runtime.as_ref(), &container, &self.config.prefix).await
        {
            warn!(container_id = %id, "Unable to remove volume of failed container: {:#}", e);
        }
    }

    /// Re-wraps collaborator errors with an outer context; domain errors
    /// such as `CapacityExceeded` pass through untouched.
    fn context(&self, err: PoolError, context: &str) -> PoolError {
        match err {
            PoolError::Collaborator { context: inner, cause } => PoolError::Collaborator {
                context: format!("{context}: {inner}"),
                cause,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitbucket::{StartupProgress, StartupStatus};
    use crate::docker::ContainerState;
    use crate::pool::testing::{FakeApp, Fixture};
    use std::time::Duration;

    #[test]
    fn version_resolution() {
        assert_eq!(resolve_image("7.5").unwrap(), "atlassian/bitbucket-server:7.5");
        assert_eq!(resolve_image("7.21.4").unwrap(), "atlassian/bitbucket-server:7.21.4");
        assert_eq!(resolve_image("latest").unwrap(), "atlassian/bitbucket-server:latest");

        for bad in ["v7", "7", "7.", "7.5.1.2", "", "7.x"] {
            assert!(
                matches!(resolve_image(bad), Err(PoolError::InvalidVersion(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn reserved_ports_differ() {
        let (http, ssh) = reserve_ports().unwrap();
        assert_ne!(http, 0);
        assert_ne!(http, ssh);
    }

    #[test]
    fn in_flight_mark_is_released_on_drop() {
        let registry = Arc::new(InFlight::default());
        let guard = registry.hold("bbpool-1000001---new");
        assert!(registry.contains("bbpool-1000001---new"));
        drop(guard);
        assert!(!registry.contains("bbpool-1000001---new"));
    }

    #[tokio::test]
    async fn provisions_a_started_and_licensed_member() {
        let fixture = Fixture::new("bbpool", 6);
        let container = fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap();

        assert!(container.name.starts_with("bbpool-"));
        assert!(container.name.ends_with("---new"));
        assert_eq!(container.state, ContainerState::Running);
        assert_eq!(container.image, "atlassian/bitbucket-server:7.5");

        let created = fixture.runtime.created();
        assert_eq!(created.len(), 1);
        assert!(created[0]
            .env
            .contains(&"ELASTICSEARCH_ENABLED=false".to_string()));
        assert!(created[0]
            .env
            .contains(&"JVM_SUPPORT_RECOMMENDED_ARGS=-Xmx1g".to_string()));
        assert_eq!(created[0].network, "bbpool-network");

        assert_eq!(fixture.app.installs(), 1);
        assert_eq!(
            fixture.app.licenses(),
            vec![(ADDON_KEY.to_string(), "LICENSE-TEXT".to_string())]
        );
    }

    #[tokio::test]
    async fn refuses_at_capacity_without_creating() {
        let fixture = Fixture::new("bbpool", 6);
        for i in 0..6 {
            fixture
                .runtime
                .insert(&format!("bbpool-100000{i}---new"), ContainerState::Running);
        }

        let err = fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::CapacityExceeded { limit: 6, current: 6 }));
        assert!(fixture.runtime.created().is_empty());
        assert!(fixture.runtime.pulled().is_empty());
    }

    #[tokio::test]
    async fn invalid_version_creates_nothing() {
        let fixture = Fixture::configured("bbpool", 6, |config| {
            config.bitbucket.version = "v7".into();
        });

        let err = fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::InvalidVersion(_)));
        assert!(fixture.runtime.created().is_empty());
    }

    #[tokio::test]
    async fn transient_startup_errors_keep_polling() {
        let app = FakeApp::default();
        app.script(vec![
            Ok(StartupProbe::Starting("connection refused".into())),
            Ok(StartupProbe::Status(StartupStatus {
                state: "STARTING".into(),
                progress: StartupProgress {
                    message: "Starting Tomcat".into(),
                    percentage: 10,
                },
            })),
            Ok(StartupProbe::Starting("connection closed before message completed".into())),
        ]);
        let fixture = Fixture::with_app("bbpool", 6, app);

        fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fixture.app.probes(), 4);
    }

    #[tokio::test]
    async fn fatal_startup_error_discards_container() {
        let app = FakeApp::default();
        app.script(vec![Err("unable to decode startup status".into())]);
        let fixture = Fixture::with_app("bbpool", 6, app);

        let err = fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PoolError::Collaborator { .. }));
        assert!(fixture.runtime.names().is_empty());
        assert_eq!(fixture.runtime.removed_volumes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn startup_deadline_yields_still_starting() {
        let app = FakeApp::default();
        app.never_start();
        let fixture = Fixture::with_app("bbpool", 6, app);

        let err = fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            PoolError::StillStarting { waited, .. } => {
                assert!(waited >= Duration::from_secs(2));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(fixture.runtime.names().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_startup_polling() {
        let app = FakeApp::default();
        app.never_start();
        let fixture = Fixture::with_app("bbpool", 6, app);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = fixture.provisioner().provision(&cancel).await.unwrap_err();
        assert!(matches!(err, PoolError::Cancelled));
        assert!(fixture.runtime.names().is_empty());
    }

    #[tokio::test]
    async fn license_failure_names_the_container() {
        let app = FakeApp::default();
        app.fail_license();
        let fixture = Fixture::with_app("bbpool", 6, app);

        let err = fixture
            .provisioner()
            .provision(&CancellationToken::new())
            .await
            .unwrap_err();

        let text = err.to_string();
        assert!(text.starts_with("unable to set license, container_id: c"), "{text}");
        assert!(text.contains("unable to set license for addon"), "{text}");
    }
}
