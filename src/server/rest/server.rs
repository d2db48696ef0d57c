use anyhow::{Context, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::server::rest::create_router;
use crate::shared::{AppState, Config};

/// Serves the REST API until `cancel` fires, then drains open requests.
pub async fn run_rest_server(
    config: &Config,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> Result<()> {
    let prefix = config.route_prefix();

    info!("Building REST API routes...");
    let app = create_router(state, &prefix);

    let bind_addr = config.listen_addr()?;
    info!("Binding to: {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;

    let local = listener.local_addr()?;
    info!("Server started successfully!");
    info!("REST API Endpoint: http://{}{}", local, prefix);
    info!("Swagger UI: http://{}/swagger-ui/", local);
    info!("OpenAPI JSON: http://{}/api-docs/openapi.json", local);
    info!("Ready to accept requests...");

    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    info!("REST API server stopped");
    Ok(())
}
