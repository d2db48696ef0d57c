use axum::{
    extract::{MatchedPath, Request},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Logs every request once it completes. Swagger asset requests go to debug
/// so allocation traffic stays readable.
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis();

    if response.status().is_server_error() {
        warn!(%method, %path, %route, status, elapsed_ms, "HTTP request failed");
    } else if path.starts_with("/swagger-ui") || path.starts_with("/api-docs") {
        debug!(%method, %path, status, elapsed_ms, "HTTP request");
    } else {
        info!(%method, %path, %route, status, elapsed_ms, "HTTP request");
    }

    response
}
