use crate::config::AppConfig;
use crate::stats::{get_stats_for_area_ids, get_stats_for_points};
use crate::store::{StatsStore, StoreError};
use crate::types::{LngLat, StatsResponse};
use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub type SharedStore = Arc<dyn StatsStore + Send + Sync>;

#[derive(Deserialize)]
pub struct LngLatsRequest {
    lnglats: Vec<LngLat>,
}

#[derive(Deserialize)]
pub struct IdsRequest {
    ids: Vec<String>,
}

pub struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "stats query failed");
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

pub fn build_router(store: SharedStore) -> Router {
    Router::new()
        .route("/api/stats/lnglats", post(stats_by_lnglats))
        .route("/api/stats/ids", post(stats_by_ids))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

pub async fn start_server(config: AppConfig, store: SharedStore) -> Result<()> {
    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting server on http://{}", addr);

    let app = build_router(store);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn stats_by_lnglats(
    State(store): State<SharedStore>,
    Json(request): Json<LngLatsRequest>,
) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(get_stats_for_points(store.as_ref(), &request.lnglats)?))
}

async fn stats_by_ids(
    State(store): State<SharedStore>,
    Json(request): Json<IdsRequest>,
) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(get_stats_for_area_ids(store.as_ref(), &request.ids)?))
}
