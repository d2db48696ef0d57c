use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde_json::json;
use std::error::Error as StdError;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::error::{AppError, Result};
use super::{ApplicationApi, StartupProbe, StartupStatus};

const STARTUP_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const UPM_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const UPM_INSTALLED_TYPE: &str = "application/vnd.atl.plugins.installed+json";
const UPM_PLUGIN_TYPE: &str = "application/vnd.atl.plugins+json";

/// Talks to one Bitbucket instance: the startup endpoint and the Universal
/// Plugin Manager (UPM) REST API.
pub struct BitbucketClient {
    client: Client,
    username: String,
    password: String,
}

impl BitbucketClient {
    pub fn new(username: &str, password: &str) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    fn plugins_url(base_url: &str) -> String {
        format!("{}/rest/plugins/1.0/", base_url.trim_end_matches('/'))
    }

    async fn ensure_success(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(AppError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

/// Errors the server produces while it is still booting: nothing listening
/// yet, the socket dropped mid-response or an idle keep-alive closed.
fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_connect() || err.is_timeout() {
        return true;
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        let text = cause.to_string();
        if text.contains("connection closed before message completed")
            || text.contains("unexpected end of file")
            || text.contains("IncompleteMessage")
        {
            return true;
        }
        source = cause.source();
    }

    false
}

#[async_trait]
impl ApplicationApi for BitbucketClient {
    async fn startup_status(&self, base_url: &str) -> Result<StartupProbe> {
        let url = format!("{}/system/startup", base_url.trim_end_matches('/'));

        let response = match self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .timeout(STARTUP_REQUEST_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if is_transient(&e) => return Ok(StartupProbe::Starting(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) if is_transient(&e) => return Ok(StartupProbe::Starting(e.to_string())),
            Err(e) => return Err(e.into()),
        };

        let status: StartupStatus = serde_json::from_slice(&body)?;
        Ok(StartupProbe::Status(status))
    }

    async fn upm_token(&self, base_url: &str) -> Result<String> {
        let url = Self::plugins_url(base_url);
        debug!("Requesting UPM token from: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("os_authType", "basic")])
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, UPM_INSTALLED_TYPE)
            .timeout(UPM_REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        response
            .headers()
            .get("upm-token")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AppError::Protocol("response has no upm-token header".to_string()))
    }

    async fn install_addon(&self, base_url: &str, token: &str, addon: &Path) -> Result<String> {
        let bytes = tokio::fs::read(addon).await?;
        let file_name = addon
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "addon.jar".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("application/java-archive")?;
        let form = Form::new().part("plugin", part);

        let url = Self::plugins_url(base_url);
        info!("Uploading add-on {:?} to {}", addon, url);

        let response = self
            .client
            .post(&url)
            .query(&[("token", token)])
            .basic_auth(&self.username, Some(&self.password))
            .header(ACCEPT, "application/json")
            .multipart(form)
            .timeout(UPM_REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        Ok(response.text().await?)
    }

    async fn set_addon_license(
        &self,
        base_url: &str,
        addon_key: &str,
        license: &str,
    ) -> Result<()> {
        let url = format!("{}{}-key/license", Self::plugins_url(base_url), addon_key);
        let body = serde_json::to_vec(&json!({ "rawLicense": license }))?;

        let response = self
            .client
            .put(&url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, UPM_PLUGIN_TYPE)
            .header(ACCEPT, UPM_PLUGIN_TYPE)
            .body(body)
            .timeout(UPM_REQUEST_TIMEOUT)
            .send()
            .await?;
        Self::ensure_success(response).await?;

        info!("License set for add-on {}", addon_key);
        Ok(())
    }
}
