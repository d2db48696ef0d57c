//! In-memory runtime and application fakes for pool tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use super::capacity::CapacityGuard;
use super::manager::PoolManager;
use super::provisioner::{InFlight, Provisioner};
use crate::bitbucket::{
    AppError, ApplicationApi, StartupProbe, StartupProgress, StartupStatus, STATE_STARTED,
};
use crate::docker::{ContainerRuntime, ContainerSpec, ContainerState, RuntimeContainer};
use crate::shared::config::Config;

#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<RuntimeContainer>>,
    next_id: AtomicUsize,
    networks: Mutex<Vec<String>>,
    pulled: Mutex<Vec<String>>,
    created: Mutex<Vec<ContainerSpec>>,
    stopped: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    removed_volumes: Mutex<Vec<String>>,
    fail_listing: AtomicBool,
    fail_remove: Mutex<Vec<String>>,
}

impl FakeRuntime {
    fn next_id(&self) -> String {
        format!("c{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Adds a container directly; returns its id.
    pub fn insert(&self, name: &str, state: ContainerState) -> String {
        let id = self.next_id();
        self.containers.lock().unwrap().push(RuntimeContainer {
            id: id.clone(),
            name: name.to_string(),
            image: "atlassian/bitbucket-server:7.5".to_string(),
            state,
            http_port: Some(32000),
            ssh_port: Some(32001),
            volumes: vec![format!("{}-volume-1{}", prefix_of(name), id.trim_start_matches('c'))],
        });
        id
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_remove(&self, id: &str) {
        self.fail_remove.lock().unwrap().push(id.to_string());
    }

    pub fn names(&self) -> Vec<String> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn container(&self, id: &str) -> Option<RuntimeContainer> {
        self.containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    pub fn networks(&self) -> Vec<String> {
        self.networks.lock().unwrap().clone()
    }

    pub fn pulled(&self) -> Vec<String> {
        self.pulled.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<ContainerSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    pub fn removed_volumes(&self) -> Vec<String> {
        self.removed_volumes.lock().unwrap().clone()
    }

    fn update(&self, id: &str, apply: impl FnOnce(&mut RuntimeContainer)) -> anyhow::Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| anyhow::anyhow!("No such container: {id}"))?;
        apply(container);
        Ok(())
    }
}

fn prefix_of(name: &str) -> &str {
    name.split('-').next().unwrap_or(name)
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_network(&self, name: &str) -> anyhow::Result<()> {
        let mut networks = self.networks.lock().unwrap();
        if !networks.iter().any(|n| n == name) {
            networks.push(name.to_string());
        }
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> anyhow::Result<()> {
        self.pulled.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> anyhow::Result<String> {
        tokio::task::yield_now().await;
        let id = self.next_id();
        self.created.lock().unwrap().push(spec.clone());
        self.containers.lock().unwrap().push(RuntimeContainer {
            id: id.clone(),
            name: spec.name.clone(),
            image: spec.image.clone(),
            state: ContainerState::Created,
            http_port: Some(spec.http_port),
            ssh_port: Some(spec.ssh_port),
            volumes: vec![spec.volume.clone()],
        });
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> anyhow::Result<()> {
        self.update(id, |c| c.state = ContainerState::Running)
    }

    async fn stop_container(&self, id: &str) -> anyhow::Result<()> {
        self.stopped.lock().unwrap().push(id.to_string());
        self.update(id, |c| c.state = ContainerState::Exited)
    }

    async fn remove_container(&self, id: &str) -> anyhow::Result<()> {
        if self.fail_remove.lock().unwrap().iter().any(|f| f == id) {
            anyhow::bail!("removal of container {id} is already in progress");
        }
        let mut containers = self.containers.lock().unwrap();
        let before = containers.len();
        containers.retain(|c| c.id != id);
        if containers.len() == before {
            anyhow::bail!("No such container: {id}");
        }
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) -> anyhow::Result<()> {
        self.removed_volumes.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn rename_container(&self, id: &str, name: &str) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        self.update(id, |c| c.name = name.to_string())
    }

    async fn list_containers(&self, prefix: &str) -> anyhow::Result<Vec<RuntimeContainer>> {
        tokio::task::yield_now().await;
        if self.fail_listing.load(Ordering::SeqCst) {
            anyhow::bail!("Cannot connect to the Docker daemon");
        }
        Ok(self
            .containers
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.name.contains(prefix))
            .cloned()
            .collect())
    }

    async fn get_container(&self, id: &str) -> anyhow::Result<Option<RuntimeContainer>> {
        Ok(self.container(id))
    }
}

type ScriptedProbe = std::result::Result<StartupProbe, String>;

/// Reports `STARTED` once its scripted probes are used up, unless told to
/// never start.
#[derive(Default)]
pub struct FakeApp {
    script: Mutex<VecDeque<ScriptedProbe>>,
    never_start: AtomicBool,
    fail_license: AtomicBool,
    probes: AtomicUsize,
    installs: Mutex<Vec<PathBuf>>,
    licenses: Mutex<Vec<(String, String)>>,
}

impl FakeApp {
    pub fn script(&self, probes: Vec<ScriptedProbe>) {
        self.script.lock().unwrap().extend(probes);
    }

    pub fn never_start(&self) {
        self.never_start.store(true, Ordering::SeqCst);
    }

    pub fn fail_license(&self) {
        self.fail_license.store(true, Ordering::SeqCst);
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn installs(&self) -> usize {
        self.installs.lock().unwrap().len()
    }

    pub fn licenses(&self) -> Vec<(String, String)> {
        self.licenses.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApplicationApi for FakeApp {
    async fn startup_status(&self, _base_url: &str) -> crate::bitbucket::Result<StartupProbe> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if let Some(scripted) = self.script.lock().unwrap().pop_front() {
            return scripted.map_err(AppError::Protocol);
        }
        if self.never_start.load(Ordering::SeqCst) {
            return Ok(StartupProbe::Starting("connection refused".to_string()));
        }
        Ok(StartupProbe::Status(StartupStatus {
            state: STATE_STARTED.to_string(),
            progress: StartupProgress {
                message: "Bitbucket is running".to_string(),
                percentage: 100,
            },
        }))
    }

    async fn upm_token(&self, _base_url: &str) -> crate::bitbucket::Result<String> {
        Ok("upm-token".to_string())
    }

    async fn install_addon(
        &self,
        _base_url: &str,
        _token: &str,
        addon: &Path,
    ) -> crate::bitbucket::Result<String> {
        self.installs.lock().unwrap().push(addon.to_path_buf());
        Ok("{\"status\":\"installed\"}".to_string())
    }

    async fn set_addon_license(
        &self,
        _base_url: &str,
        addon_key: &str,
        license: &str,
    ) -> crate::bitbucket::Result<()> {
        if self.fail_license.load(Ordering::SeqCst) {
            return Err(AppError::Api {
                status: 400,
                body: "invalid license".to_string(),
            });
        }
        self.licenses
            .lock()
            .unwrap()
            .push((addon_key.to_string(), license.to_string()));
        Ok(())
    }
}

/// A pool manager wired to fakes, with add-on and license files on disk.
pub struct Fixture {
    pub runtime: Arc<FakeRuntime>,
    pub app: Arc<FakeApp>,
    pub config: Arc<Config>,
    pub pool: Arc<PoolManager>,
    _dir: TempDir,
}

impl Fixture {
    pub fn new(prefix: &str, max_size: usize) -> Self {
        Self::build(prefix, max_size, FakeApp::default(), |_| {})
    }

    pub fn with_app(prefix: &str, max_size: usize, app: FakeApp) -> Self {
        Self::build(prefix, max_size, app, |_| {})
    }

    pub fn configured(prefix: &str, max_size: usize, tweak: impl FnOnce(&mut Config)) -> Self {
        Self::build(prefix, max_size, FakeApp::default(), tweak)
    }

    pub fn build(
        prefix: &str,
        max_size: usize,
        app: FakeApp,
        tweak: impl FnOnce(&mut Config),
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(prefix, max_size, dir.path());
        tweak(&mut config);
        let config = Arc::new(config);

        let runtime = Arc::new(FakeRuntime::default());
        let app = Arc::new(app);
        let pool = Arc::new(PoolManager::new(config.clone(), runtime.clone(), app.clone()));

        Self {
            runtime,
            app,
            config,
            pool,
            _dir: dir,
        }
    }

    /// A standalone provisioner sharing this fixture's fakes.
    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(
            self.config.clone(),
            self.runtime.clone(),
            self.app.clone(),
            Arc::new(CapacityGuard::new(self.runtime.clone(), &self.config.prefix)),
            Arc::new(InFlight::default()),
        )
    }
}

pub fn test_config(prefix: &str, max_size: usize, dir: &Path) -> Config {
    let addon_path = dir.join("snake.jar");
    let license_path = dir.join("license.txt");
    std::fs::write(&addon_path, b"JAR").unwrap();
    std::fs::write(&license_path, "LICENSE-TEXT").unwrap();

    let mut config = Config {
        prefix: prefix.to_string(),
        listening_port: ":0".to_string(),
        addon_path,
        license_path,
        ..Config::default()
    };
    config.bitbucket.url = "localhost".to_string();
    config.bitbucket.username = "admin".to_string();
    config.bitbucket.password = "admin".to_string();
    config.bitbucket.version = "7.5".to_string();
    config.bitbucket.jvm_support_recommended_args = "-Xmx1g".to_string();
    config.bitbucket.elastic_search_enabled = "false".to_string();
    config.pool.max_size = max_size;
    config.pool.initial_size = max_size.min(2);
    config.pool.startup_poll_interval_ms = 1;
    config.pool.startup_timeout_seconds = 2;
    config
}
