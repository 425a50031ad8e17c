//! Router assembly.
//!
//! Binds the HTTP surface: the agent RPC, the observability probe, the
//! WebSocket upgrade, the WS-ticket mint, and a liveness check. The canvas
//! client is served from elsewhere, so CORS allows any origin.

pub mod agent;
pub mod objects;
pub mod observability;
pub mod ws;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::auth::{self, AuthUser};
use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(
            "/boardAgent",
            post(agent::board_agent).options(agent::board_agent_preflight),
        )
        .route("/observabilityCheck", post(observability::observability_check))
        .route(
            "/api/board/{id}/objects",
            get(objects::list_objects).post(objects::create_object),
        )
        .route(
            "/api/board/{id}/objects/{object_id}",
            get(objects::get_object)
                .patch(objects::patch_object)
                .delete(objects::delete_object),
        )
        .route("/api/auth/ws-ticket", post(ws_ticket))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
}

/// `POST /api/auth/ws-ticket` — mint a one-time WS ticket.
async fn ws_ticket(State(state): State<AppState>, auth: AuthUser) -> Result<Json<serde_json::Value>, StatusCode> {
    let ticket = auth::create_ws_ticket(state.pool(), auth.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!({ "ticket": ticket })))
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
