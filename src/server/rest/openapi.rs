use utoipa::{
    openapi::server::{Server, ServerBuilder},
    OpenApi,
};

use crate::shared::models::{Member, MemberStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::server::rest::openapi::health,
        crate::server::rest::openapi::list_containers,
        crate::server::rest::openapi::free_container,
        crate::server::rest::openapi::get_container,
        crate::server::rest::openapi::create_container,
        crate::server::rest::openapi::delete_container,
    ),
    components(schemas(Member, MemberStatus)),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Containers", description = "Pool member allocation and management"),
    ),
    info(
        title = "bbpool REST API",
        version = "1.0.0",
        description = "Pool of ready-to-use Bitbucket Server containers",
    ),
)]
pub struct ApiDoc;

/// The document with its server URL pointing at the configured route prefix.
pub fn document(route_prefix: &str) -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    let url = if route_prefix.is_empty() { "/" } else { route_prefix };
    let server: Server = ServerBuilder::new()
        .url(url)
        .description(Some("Current server"))
        .build();
    doc.servers = Some(vec![server]);
    doc
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Service is healthy"),
    ),
)]
#[allow(dead_code)]
pub async fn health() {}

#[utoipa::path(
    get,
    path = "/container/all",
    tag = "Containers",
    responses(
        (status = 200, description = "All pool members", body = Vec<Member>),
        (status = 500, description = "Container runtime unavailable", body = String),
    ),
)]
#[allow(dead_code)]
pub async fn list_containers() {}

#[utoipa::path(
    get,
    path = "/freecontainer",
    tag = "Containers",
    responses(
        (status = 200, description = "Claimed member, provisioned on demand when none is free", body = Member),
        (status = 500, description = "Capacity exhausted or provisioning failed", body = String),
    ),
)]
#[allow(dead_code)]
pub async fn free_container() {}

#[utoipa::path(
    get,
    path = "/container/{id}",
    tag = "Containers",
    params(
        ("id" = String, Path, description = "Container id"),
    ),
    responses(
        (status = 200, description = "Pool member", body = Member),
        (status = 404, description = "No such container", body = String),
        (status = 500, description = "Container runtime unavailable", body = String),
    ),
)]
#[allow(dead_code)]
pub async fn get_container() {}

#[utoipa::path(
    post,
    path = "/container",
    tag = "Containers",
    responses(
        (status = 200, description = "Provisioned, unclaimed member", body = Member),
        (status = 500, description = "Capacity exhausted or provisioning failed", body = String),
    ),
)]
#[allow(dead_code)]
pub async fn create_container() {}

#[utoipa::path(
    delete,
    path = "/container/{id}",
    tag = "Containers",
    params(
        ("id" = String, Path, description = "Container id"),
    ),
    responses(
        (status = 200, description = "Container removed", body = String),
        (status = 404, description = "No such container", body = String),
        (status = 500, description = "Container could not be removed", body = String),
    ),
)]
#[allow(dead_code)]
pub async fn delete_container() {}
