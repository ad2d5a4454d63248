use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::{AppState, config::Env};

#[derive(Debug, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RootResponse {
    pub message: String,
    pub version: String,
}

/// HealthResponse
///
/// `details` is only present when the service is unhealthy.
#[derive(Debug, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub details: Option<String>,
}

/// root
///
/// [Public Route] Liveness banner with the application name and version.
#[utoipa::path(
    get,
    path = "/",
    tag = "system",
    responses((status = 200, description = "Service is running", body = RootResponse))
)]
pub async fn root(State(state): State<AppState>) -> Json<RootResponse> {
    let app = &state.config.app;
    Json(RootResponse {
        message: format!("{} is running successfully!", app.name),
        version: app.version.clone(),
    })
}

/// health
///
/// [Public Route] Runs a trivial query against the database. Failure details
/// are only disclosed in development.
#[utoipa::path(
    get,
    path = "/health",
    tag = "system",
    responses(
        (status = 200, description = "Database reachable", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match state.repo.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                details: None,
            }),
        ),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            let details = if state.config.env == Env::Development {
                e.to_string()
            } else {
                "Error details hidden".to_string()
            };
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    details: Some(details),
                }),
            )
        }
    }
}
