use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::docker::RuntimeContainer;
use crate::pool::naming;
use crate::shared::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    /// Available for allocation.
    New,
    /// Claimed until its expiry.
    Allocated,
}

/// A pool member as served over the REST surface.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub name: String,
    pub image: String,
    pub http_port: Option<u16>,
    pub ssh_port: Option<u16>,
    pub username: String,
    pub password: String,
    pub status: MemberStatus,
    #[schema(value_type = Option<String>, example = "2026-10-16T13:04:05")]
    pub expires_at: Option<NaiveDateTime>,
    /// Docker state, e.g. `running` or `exited`.
    pub state: String,
    pub url: Option<String>,
}

impl Member {
    pub fn from_container(container: &RuntimeContainer, config: &Config) -> Self {
        let status = naming::derive_status(&container.name);
        let expires_at = match status {
            MemberStatus::Allocated => naming::decode_expiry(&container.name).ok(),
            MemberStatus::New => None,
        };

        Self {
            id: container.id.clone(),
            name: container.name.clone(),
            image: container.image.clone(),
            http_port: container.http_port,
            ssh_port: container.ssh_port,
            username: config.bitbucket.username.clone(),
            password: config.bitbucket.password.clone(),
            status,
            expires_at,
            state: container.state.to_string(),
            url: container.http_port.map(|port| config.member_url(port)),
        }
    }
}
