//! HTTP request handlers

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use kara_common::Song;
use serde::Serialize;
use tracing::error;

use super::AppContext;
use crate::supervisor::SessionSnapshot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
    git_hash: String,
    build_timestamp: String,
    state: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    status: String,
}

/// GET /health
pub async fn health(
    State(ctx): State<AppContext>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<StatusResponse>)> {
    match ctx.supervisor.snapshot().await {
        Ok(state) => Ok(Json(HealthResponse {
            status: "ok".to_string(),
            module: "kara-relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            git_hash: env!("KARA_GIT_HASH").to_string(),
            build_timestamp: env!("KARA_BUILD_TIMESTAMP").to_string(),
            state,
        })),
        Err(e) => {
            error!("Health check failed: {}", e);
            Err((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(StatusResponse {
                    status: format!("error: {}", e),
                }),
            ))
        }
    }
}

/// GET /songs - the catalog as last scanned
pub async fn songs(State(ctx): State<AppContext>) -> Json<Vec<Song>> {
    Json(ctx.catalog.songs().await.as_ref().clone())
}
