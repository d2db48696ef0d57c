use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("required config field is missing: {0}")]
    Missing(&'static str),
    #[error("invalid listening_port {0:?}, expected \":port\" or \"host:port\"")]
    InvalidListen(String),
    #[error("invalid pool settings: {0}")]
    InvalidPool(String),
}

/// Legacy database section. Parsed so existing config files keep loading;
/// nothing in the pool manager reads it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub uri: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitbucketConfig {
    /// Host the pool members are reachable on, e.g. `localhost`.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub jvm_support_recommended_args: String,
    #[serde(default)]
    pub server_proxy_name: String,
    #[serde(default)]
    pub elastic_search_enabled: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_size: usize,
    pub initial_size: usize,
    pub lease_seconds: u64,
    pub reclaim_interval_seconds: u64,
    pub startup_timeout_seconds: u64,
    pub startup_poll_interval_ms: u64,
    pub bootstrap_attempts: u32,
    pub bootstrap_retry_delay_seconds: u64,
    pub network: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 6,
            initial_size: 2,
            lease_seconds: 60 * 60,
            reclaim_interval_seconds: 20,
            startup_timeout_seconds: 15 * 60,
            startup_poll_interval_ms: 1000,
            bootstrap_attempts: 3,
            bootstrap_retry_delay_seconds: 30,
            network: "bbpool-network".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_seconds)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    pub fn startup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.startup_poll_interval_ms)
    }

    pub fn bootstrap_retry_delay(&self) -> Duration {
        Duration::from_secs(self.bootstrap_retry_delay_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub listening_port: String,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub bitbucket: BitbucketConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// Add-on jar installed into every new member. Set from the command line.
    #[serde(skip)]
    pub addon_path: PathBuf,
    /// License text submitted for the add-on. Set from the command line.
    #[serde(skip)]
    pub license_path: PathBuf,
}

impl Config {
    /// Loads the YAML file at `path` (a missing file is not an error), applies
    /// environment overrides and validates the result.
    pub fn load(
        path: &Path,
        addon_path: PathBuf,
        license_path: PathBuf,
    ) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Self::from_yaml(&raw)?
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.addon_path = addon_path;
        config.license_path = license_path;
        config.validate()?;

        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(uri) = lookup("DATABASE_URI") {
            self.database.get_or_insert_with(Default::default).uri = uri;
        }
        if let Some(name) = lookup("DATABASE_NAME") {
            self.database.get_or_insert_with(Default::default).name = name;
        }

        let bitbucket = &mut self.bitbucket;
        for (key, field) in [
            ("BITBUCKET_VERSION", &mut bitbucket.version),
            (
                "JVM_SUPPORT_RECOMMENDED_ARGS",
                &mut bitbucket.jvm_support_recommended_args,
            ),
            ("SERVER_PROXY_NAME", &mut bitbucket.server_proxy_name),
            ("ELASTICSEARCH_ENABLED", &mut bitbucket.elastic_search_enabled),
        ] {
            if let Some(value) = lookup(key) {
                *field = value;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("prefix", &self.prefix),
            ("listening_port", &self.listening_port),
            ("bitbucket.url", &self.bitbucket.url),
            ("bitbucket.username", &self.bitbucket.username),
            ("bitbucket.password", &self.bitbucket.password),
            ("bitbucket.version", &self.bitbucket.version),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Missing(field));
            }
        }

        self.listen_addr()?;

        if self.pool.max_size == 0 {
            return Err(ConfigError::InvalidPool("max_size must be positive".into()));
        }
        if self.pool.initial_size > self.pool.max_size {
            return Err(ConfigError::InvalidPool(format!(
                "initial_size {} exceeds max_size {}",
                self.pool.initial_size, self.pool.max_size
            )));
        }
        if self.pool.startup_poll_interval_ms == 0 {
            return Err(ConfigError::InvalidPool(
                "startup_poll_interval_ms must be positive".into(),
            ));
        }

        Ok(())
    }

    /// Socket address to bind the HTTP server to. Accepts the `:8080` form
    /// used by older config files as well as `host:port`.
    pub fn listen_addr(&self) -> Result<String, ConfigError> {
        let raw = self.listening_port.trim();
        let (host, port) = raw
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidListen(raw.to_string()))?;
        port.parse::<u16>()
            .map_err(|_| ConfigError::InvalidListen(raw.to_string()))?;

        let host = if host.is_empty() { "0.0.0.0" } else { host };
        Ok(format!("{host}:{port}"))
    }

    /// Route prefix the REST surface is nested under; empty for the root.
    pub fn route_prefix(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("/{trimmed}")
        }
    }

    pub fn member_url(&self, http_port: u16) -> String {
        format!("http://{}:{}", self.bitbucket.url, http_port)
    }
}
