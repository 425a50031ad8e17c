//! `POST /observabilityCheck` — tracing backend health probe.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;

use crate::state::AppState;

pub async fn observability_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    match state.tracer.health_check().await {
        Ok(()) => Ok(Json(json!({ "status": "ok" }))),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "message": e.to_string() })),
        )),
    }
}
