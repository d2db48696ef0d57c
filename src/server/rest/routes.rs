use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa_swagger_ui::SwaggerUi;

use crate::server::rest::{
    handlers::containers, logging_middleware::request_logging_middleware, openapi,
};
use crate::shared::models::AppState;

/// Builds the router. Pool routes live under `route_prefix` (empty for the
/// root); Swagger UI is always served from the root.
pub fn create_router(state: Arc<AppState>, route_prefix: &str) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health))
        .route("/container/all", get(containers::list_containers))
        .route("/freecontainer", get(containers::free_container))
        .route(
            "/container/{id}",
            get(containers::get_container).delete(containers::delete_container),
        )
        .route("/container", post(containers::create_container))
        .route("/container/", post(containers::create_container))
        .with_state(state);

    let router = if route_prefix.is_empty() {
        Router::new().merge(api_routes)
    } else {
        Router::new().nest(route_prefix, api_routes)
    };

    router
        .merge(
            SwaggerUi::new("/swagger-ui")
                .url("/api-docs/openapi.json", openapi::document(route_prefix)),
        )
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::ContainerState;
    use crate::pool::testing::Fixture;
    use crate::shared::models::{Member, MemberStatus};
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use axum::response::Response;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    fn router(fixture: &Fixture, prefix: &str) -> Router {
        let state = Arc::new(AppState {
            pool: fixture.pool.clone(),
            cancel: CancellationToken::new(),
        });
        create_router(state, prefix)
    }

    async fn call(router: Router, method: Method, uri: &str) -> Response {
        router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_is_served_under_the_prefix() {
        let fixture = Fixture::new("bbpool", 2);
        let response = call(router(&fixture, "/pool"), Method::GET, "/pool/health").await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = call(router(&fixture, "/pool"), Method::GET, "/health").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_all_members() {
        let fixture = Fixture::new("bbpool", 2);
        fixture
            .runtime
            .insert("bbpool-1000001---new", ContainerState::Running);

        let response = call(router(&fixture, ""), Method::GET, "/container/all").await;
        assert_eq!(response.status(), StatusCode::OK);

        let members: Vec<Member> = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].status, MemberStatus::New);
    }

    #[tokio::test]
    async fn runtime_failure_is_a_plain_text_500() {
        let fixture = Fixture::new("bbpool", 2);
        fixture.runtime.fail_listing(true);

        let response = call(router(&fixture, ""), Method::GET, "/container/all").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(text(response)
            .await
            .starts_with("unable to get containers by prefix: bbpool"));
    }

    #[tokio::test]
    async fn unknown_container_is_404() {
        let fixture = Fixture::new("bbpool", 2);
        let response = call(router(&fixture, ""), Method::GET, "/container/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(text(response).await, "container not found: nope");

        let response = call(router(&fixture, ""), Method::DELETE, "/container/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn delete_reports_the_removed_id() {
        let fixture = Fixture::new("bbpool", 2);
        let id = fixture
            .runtime
            .insert("bbpool-1000001---new", ContainerState::Running);

        let uri = format!("/container/{id}");
        let response = call(router(&fixture, ""), Method::DELETE, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            text(response).await,
            format!("container successfully removed: {id}")
        );
        assert!(fixture.runtime.container(&id).is_none());
    }

    #[tokio::test]
    async fn free_container_claims_and_create_does_not() {
        let fixture = Fixture::new("bbpool", 2);

        let response = call(router(&fixture, "/pool"), Method::POST, "/pool/container/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let created: Member = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(created.status, MemberStatus::New);

        let response = call(router(&fixture, "/pool"), Method::GET, "/pool/freecontainer").await;
        assert_eq!(response.status(), StatusCode::OK);
        let claimed: Member = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(claimed.id, created.id);
        assert_eq!(claimed.status, MemberStatus::Allocated);
        assert!(claimed.expires_at.is_some());

        let uri = format!("/pool/container/{}", created.id);
        let response = call(router(&fixture, "/pool"), Method::GET, &uri).await;
        let fetched: Member = serde_json::from_str(&text(response).await).unwrap();
        assert_eq!(fetched.name, claimed.name);
    }

    #[tokio::test]
    async fn exhausted_pool_is_a_500() {
        let fixture = Fixture::new("bbpool", 1);
        fixture.runtime.insert(
            "bbpool-1000001---allocated--2099-Jan-1-00.00.00",
            ContainerState::Running,
        );

        let response = call(router(&fixture, ""), Method::GET, "/freecontainer").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(text(response).await.contains("limit of created containers exceeded"));

        let response = call(router(&fixture, ""), Method::POST, "/container").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let fixture = Fixture::new("bbpool", 2);
        let response = call(router(&fixture, "/pool"), Method::GET, "/api-docs/openapi.json").await;
        assert_eq!(response.status(), StatusCode::OK);

        let doc: serde_json::Value = serde_json::from_str(&text(response).await).unwrap();
        assert!(doc["paths"]["/freecontainer"].is_object());
        assert_eq!(doc["servers"][0]["url"], "/pool");
    }
}
