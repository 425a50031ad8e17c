//! `POST /boardAgent` — natural-language board commands.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::agent::{self, AgentError};
use crate::auth::AuthUser;
use crate::model::Fields;
use crate::state::AppState;
use crate::store::Collection;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardAgentRequest {
    #[serde(default)]
    pub board_id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    /// The board snapshot as the client sees it; each element carries an
    /// `id` plus object fields. When absent, the server view is used.
    #[serde(default)]
    pub board_state: Vec<serde_json::Value>,
}

/// Handle one agent invocation.
///
/// Status contract: 200 with `{actions, summary}`, 400 on a missing
/// `boardId`/`command`, 401 from the auth extractor, 500 on agent failure.
pub async fn board_agent(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<BoardAgentRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let board_id = body
        .board_id
        .as_deref()
        .and_then(|raw| raw.parse::<Uuid>().ok())
        .ok_or_else(|| bad_request("boardId is required"))?;
    let command = body
        .command
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| bad_request("command is required"))?;

    let Some(llm) = state.llm.clone() else {
        return Err(server_error("agent not configured"));
    };

    // The prompt snapshot (and with it the known-id set) comes from the
    // client's view when it sent one; otherwise read the server view.
    let snapshot = if body.board_state.is_empty() {
        state
            .store
            .read_server(board_id, Collection::Objects)
            .await
            .map_err(|e| {
                error!(error = %e, %board_id, "agent snapshot read failed");
                server_error("failed to read board state")
            })?
    } else {
        parse_board_state(&body.board_state)
    };

    let outcome = agent::run_agent(
        &state.store,
        &llm,
        &state.tracer,
        &state.agent_cfg,
        board_id,
        &auth.user_id.to_string(),
        command,
        snapshot,
    )
    .await
    .map_err(|e| match e {
        AgentError::NotConfigured => server_error("agent not configured"),
        AgentError::TurnTimeout => server_error("agent timed out before planning any action"),
        AgentError::Llm(err) => {
            error!(error = %err, %board_id, "agent LLM failure");
            server_error("agent provider failure")
        }
        AgentError::Store(err) => {
            error!(error = %err, %board_id, "agent commit failure");
            server_error("agent commit failure")
        }
    })?;

    Ok(Json(json!({
        "actions": outcome.actions,
        "summary": outcome.summary,
    })))
}

/// `OPTIONS /boardAgent` — CORS preflight answers 204; the CORS layer adds
/// the allow headers.
pub async fn board_agent_preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

fn parse_board_state(raw: &[serde_json::Value]) -> Vec<(String, Fields)> {
    raw.iter()
        .filter_map(|item| {
            let obj = item.as_object()?;
            let id = obj.get("id").and_then(|v| v.as_str())?.to_owned();
            let fields: Fields = obj
                .iter()
                .filter(|(key, _)| key.as_str() != "id")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Some((id, fields))
        })
        .collect()
}

fn bad_request(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn server_error(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": message })))
}
