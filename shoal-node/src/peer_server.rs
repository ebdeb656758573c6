//! Axum router for the peer RPC surface: chunk serving, liveness, and
//! the contributor download trigger.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use shoal_core::PeerContext;
use shoal_core::peer::{fetch_and_download, store};
use shoal_core::protocol::{DownloadRequest, GenResponse, HealthResponse, STATUS_OK};
use tower_http::cors::CorsLayer;

/// Builds the peer router over shared peer state.
pub fn peer_router(ctx: Arc<PeerContext>) -> Router {
    Router::new()
        .route("/api/chunk", get(chunk))
        .route("/api/health", get(health))
        .route("/api/download", post(download))
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

/// Binds `addr` and serves the peer until the task is aborted.
///
/// # Errors
/// - `std::io::Error` - bind or accept failure
pub async fn serve_peer(ctx: Arc<PeerContext>, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("peer listening on {}", listener.local_addr()?);
    axum::serve(listener, peer_router(ctx)).await
}

#[derive(Deserialize)]
struct ChunkQuery {
    name: String,
}

async fn chunk(State(ctx): State<Arc<PeerContext>>, Query(query): Query<ChunkQuery>) -> Response {
    match store::read_chunk(&ctx.layout().chunks_dir, &query.name).await {
        Ok(Some(data)) => (StatusCode::OK, data).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::error!("failed to read chunk {}: {err}", query.name);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { alive: true })
}

async fn download(
    State(ctx): State<Arc<PeerContext>>,
    Json(request): Json<DownloadRequest>,
) -> Json<GenResponse> {
    tokio::spawn(async move {
        if let Err(err) = fetch_and_download(ctx, &request.file_name).await {
            tracing::error!("instructed download of {} failed: {err}", request.file_name);
        }
    });
    Json(GenResponse { status: STATUS_OK })
}
