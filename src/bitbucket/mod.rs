mod client;
mod error;

pub use client::BitbucketClient;
pub use error::{AppError, Result};

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;

/// Startup state reported once the application is fully up.
pub const STATE_STARTED: &str = "STARTED";

/// Body of `GET /system/startup`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartupStatus {
    pub state: String,
    #[serde(default)]
    pub progress: StartupProgress,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StartupProgress {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub percentage: i64,
}

impl StartupStatus {
    pub fn is_started(&self) -> bool {
        self.state == STATE_STARTED
    }
}

/// One poll of the readiness endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum StartupProbe {
    /// The server is not accepting requests yet; the text says why.
    Starting(String),
    Status(StartupStatus),
}

/// Calls made against a running application instance. `base_url` is the
/// instance root, e.g. `http://localhost:32768`.
#[async_trait]
pub trait ApplicationApi: Send + Sync {
    async fn startup_status(&self, base_url: &str) -> Result<StartupProbe>;
    async fn upm_token(&self, base_url: &str) -> Result<String>;
    /// Uploads the add-on jar; returns the response body.
    async fn install_addon(&self, base_url: &str, token: &str, addon: &Path) -> Result<String>;
    async fn set_addon_license(&self, base_url: &str, addon_key: &str, license: &str)
        -> Result<()>;
}
