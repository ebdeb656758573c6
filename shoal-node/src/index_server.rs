//! Axum router for the index RPC surface.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use serde::Deserialize;
use shoal_core::SwarmIndex;
use shoal_core::protocol::framing::decode_stream;
use shoal_core::protocol::{
    ContributorRequest, DescriptorResponse, GenResponse, SearchResponse, SeedingRequest,
    UploadResponse,
};
use tower_http::cors::CorsLayer;

/// Builds the index router over shared index state.
pub fn index_router(index: Arc<SwarmIndex>) -> Router {
    Router::new()
        .route("/api/upload", post(upload))
        .route("/api/descriptor", get(descriptor))
        .route("/api/search", get(search))
        .route("/api/seeding/enable", post(enable_seeding))
        .route("/api/seeding/disable", post(stop_seeding))
        .route("/api/contributors", post(register_contributor))
        .layer(CorsLayer::permissive())
        .with_state(index)
}

/// Binds `addr` and serves the index until the task is aborted.
///
/// # Errors
/// - `std::io::Error` - bind or accept failure
pub async fn serve_index(index: Arc<SwarmIndex>, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("index listening on {}", listener.local_addr()?);
    axum::serve(listener, index_router(index)).await
}

#[derive(Deserialize)]
struct FileNameQuery {
    file_name: String,
}

#[derive(Deserialize)]
struct SearchQuery {
    query: String,
}

async fn upload(State(index): State<Arc<SwarmIndex>>, body: Body) -> Json<UploadResponse> {
    let frames = Box::pin(decode_stream(body.into_data_stream()));
    Json(index.ingest_upload(frames).await)
}

async fn descriptor(
    State(index): State<Arc<SwarmIndex>>,
    Query(query): Query<FileNameQuery>,
) -> Json<DescriptorResponse> {
    Json(index.descriptor_response(&query.file_name).await)
}

async fn search(
    State(index): State<Arc<SwarmIndex>>,
    Query(query): Query<SearchQuery>,
) -> Json<SearchResponse> {
    Json(SearchResponse {
        results: index.search(&query.query).await,
    })
}

async fn enable_seeding(
    State(index): State<Arc<SwarmIndex>>,
    Json(request): Json<SeedingRequest>,
) -> Json<GenResponse> {
    Json(index.enable_seeding(&request.file_name, &request.endpoint).await)
}

async fn stop_seeding(
    State(index): State<Arc<SwarmIndex>>,
    Json(request): Json<SeedingRequest>,
) -> Json<GenResponse> {
    Json(index.stop_seeding(&request.file_name, &request.endpoint).await)
}

async fn register_contributor(
    State(index): State<Arc<SwarmIndex>>,
    Json(request): Json<ContributorRequest>,
) -> Json<GenResponse> {
    Json(index.register_contributor(&request.endpoint).await)
}
