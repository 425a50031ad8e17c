//! Object REST routes — read and mutate board objects over HTTP.
//!
//! The WebSocket surface is the primary client path; these endpoints serve
//! integrations and tooling. Reads apply the same visibility rule as
//! subscription snapshots: a connector with a missing endpoint is hidden.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::json;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::model::{self, Fields};
use crate::mutation::{self, MutationError};
use crate::state::AppState;
use crate::store::Collection;

/// `GET /api/board/:id/objects` — list visible objects.
pub async fn list_objects(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let snapshot = state
        .store
        .snapshot(board_id, Collection::Objects)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let ids: std::collections::HashSet<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
    let objects: Vec<serde_json::Value> = snapshot
        .iter()
        .filter(|(_, fields)| !model::connector_is_dangling(fields, |id| ids.contains(id)))
        .map(|(id, fields)| object_json(id, fields))
        .collect();

    Ok(Json(json!({ "objects": objects, "count": objects.len() })))
}

/// `GET /api/board/:id/objects/:object_id` — fetch one object.
pub async fn get_object(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path((board_id, object_id)): Path<(Uuid, String)>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let snapshot = state
        .store
        .snapshot(board_id, Collection::Objects)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let ids: std::collections::HashSet<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
    let found = snapshot
        .iter()
        .find(|(id, _)| *id == object_id)
        .filter(|(_, fields)| !model::connector_is_dangling(fields, |id| ids.contains(id)))
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(object_json(&found.0, &found.1)))
}

/// `POST /api/board/:id/objects` — create an object. The body carries the
/// object fields plus an optional `id`.
pub async fn create_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<serde_json::Value>), (StatusCode, Json<serde_json::Value>)> {
    let Some(map) = body.as_object() else {
        return Err(error_response(StatusCode::BAD_REQUEST, "body must be an object"));
    };
    let proposed_id = map.get("id").and_then(|v| v.as_str()).map(str::to_owned);
    let fields: Fields = map
        .iter()
        .filter(|(key, _)| key.as_str() != "id")
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    let (object_id, stored) = mutation::create_object(
        &state.hubs,
        &state.store,
        board_id,
        &auth.user_id.to_string(),
        proposed_id,
        fields,
    )
    .await
    .map_err(mutation_error_response)?;

    Ok((StatusCode::CREATED, Json(object_json(&object_id, &stored))))
}

/// `PATCH /api/board/:id/objects/:object_id` — merge a partial update.
pub async fn patch_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, object_id)): Path<(Uuid, String)>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let Some(map) = body.as_object() else {
        return Err(error_response(StatusCode::BAD_REQUEST, "body must be an object"));
    };
    let patch: Fields = map.iter().map(|(key, value)| (key.clone(), value.clone())).collect();

    let stored = mutation::update_object(&state.hubs, board_id, &auth.user_id.to_string(), &object_id, patch)
        .await
        .map_err(mutation_error_response)?;

    Ok(Json(object_json(&object_id, &stored)))
}

/// `DELETE /api/board/:id/objects/:object_id` — idempotent delete with
/// connector cascade.
pub async fn delete_object(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, object_id)): Path<(Uuid, String)>,
) -> Result<StatusCode, (StatusCode, Json<serde_json::Value>)> {
    mutation::delete_object(&state.hubs, board_id, &auth.user_id.to_string(), &object_id)
        .await
        .map_err(mutation_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

fn object_json(id: &str, fields: &Fields) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert("id".into(), json!(id));
    for (key, value) in fields {
        map.insert(key.clone(), value.clone());
    }
    serde_json::Value::Object(map)
}

fn error_response(status: StatusCode, message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "error": message })))
}

pub(crate) fn mutation_error_response(err: MutationError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &err {
        MutationError::Model(_) | MutationError::InvalidId(_) => StatusCode::BAD_REQUEST,
        MutationError::IdInUse(_) => StatusCode::CONFLICT,
        MutationError::Hub(_) | MutationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

#[cfg(test)]
#[path = "objects_test.rs"]
mod tests;
