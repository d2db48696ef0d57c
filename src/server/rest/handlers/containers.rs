use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;
use tracing::{error, info};

use crate::server::rest::error::{ApiError, ApiResult};
use crate::shared::models::{AppState, Member};

/// Logs the failure the way every handler reports it, then converts it.
fn failure(operation: &str, err: impl Into<ApiError>) -> ApiError {
    let err = err.into();
    error!("{}: {}", operation, err);
    err
}

pub async fn list_containers(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Member>>> {
    let members = state
        .pool
        .list_all()
        .await
        .map_err(|e| failure("unable to list containers", e))?;
    Ok(Json(members))
}

/// Claims a free member, or provisions and claims one. Runs in its own
/// task so a dropped connection does not abort provisioning halfway.
pub async fn free_container(State(state): State<Arc<AppState>>) -> ApiResult<Json<Member>> {
    let pool = state.pool.clone();
    let cancel = state.cancel.child_token();

    let member = tokio::spawn(async move { pool.allocate(&cancel).await })
        .await
        .map_err(|e| failure("unable to get free container", e))?
        .map_err(|e| failure("unable to get free container", e))?;

    info!(container_id = %member.id, name = %member.name, "Container handed out");
    Ok(Json(member))
}

pub async fn get_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Member>> {
    let member = state
        .pool
        .get_by_id(&id)
        .await
        .map_err(|e| failure("unable to get container", e))?;
    Ok(Json(member))
}

/// Provisions a member without claiming it.
pub async fn create_container(State(state): State<Arc<AppState>>) -> ApiResult<Json<Member>> {
    let pool = state.pool.clone();
    let cancel = state.cancel.child_token();

    let member = tokio::spawn(async move { pool.create_explicit(&cancel).await })
        .await
        .map_err(|e| failure("unable to create container", e))?
        .map_err(|e| failure("unable to create container", e))?;

    info!(container_id = %member.id, "Container created");
    Ok(Json(member))
}

pub async fn delete_container(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<String> {
    state
        .pool
        .remove_by_id(&id)
        .await
        .map_err(|e| failure("unable to remove container", e))?;
    Ok(format!("container successfully removed: {id}"))
}
