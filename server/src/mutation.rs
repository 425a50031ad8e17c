//! Mutation API — the external write surface for objects and presence.
//!
//! DESIGN
//! ======
//! Object mutations validate here, then route through the board hub so they
//! are applied in arrival order. Updates are merge writes and succeed even
//! when the target document is missing — a skeleton is created — which
//! tolerates races with concurrent deletes and agent-fabricated IDs.
//! Presence writes skip the hub's object path entirely: they validate,
//! throttle (cursor moves only), and land in the presence sub-collection
//! directly.

use tracing::info;
use uuid::Uuid;

use crate::clock;
use crate::frame::ErrorCode;
use crate::hub::{ApplyWrite, HubError, HubRegistry};
use crate::model::{self, Fields, ModelError, ObjectType};
use crate::presence::{self, PresenceTracker};
use crate::store::{BoardId, Collection, Store, StoreError, WriteMode};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Hub(#[from] HubError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid object id: {0}")]
    InvalidId(String),
    #[error("object id already in use: {0}")]
    IdInUse(String),
}

impl ErrorCode for MutationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Model(e) => e.error_code(),
            Self::Hub(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::InvalidId(_) => "E_INVALID_ID",
            Self::IdInUse(_) => "E_ID_IN_USE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Hub(e) if e.retryable()) || matches!(self, Self::Store(e) if e.retryable())
    }
}

/// Kind of presence write, for throttle admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceWrite {
    /// Pointer move; throttled.
    Cursor,
    /// Periodic liveness refresh; never throttled.
    Keepalive,
    /// Session start; never throttled.
    Join,
}

// =============================================================================
// OBJECTS
// =============================================================================

/// Create an object. Assigns an ID when the client did not propose one;
/// a proposed ID must be syntactically valid and unused.
///
/// # Errors
///
/// Validation failures, ID conflicts, and store/hub faults.
pub async fn create_object(
    registry: &HubRegistry,
    store: &Store,
    board_id: BoardId,
    user_id: &str,
    proposed_id: Option<String>,
    mut fields: Fields,
) -> Result<(String, Fields), MutationError> {
    let ty = model::validate_create(&fields)?;

    let object_id = match proposed_id {
        Some(id) => {
            if !clock::is_valid_object_id(&id) {
                return Err(MutationError::InvalidId(id));
            }
            let in_use = store
                .snapshot(board_id, Collection::Objects)
                .await?
                .iter()
                .any(|(existing, _)| *existing == id);
            if in_use {
                return Err(MutationError::IdInUse(id));
            }
            id
        }
        None => clock::new_object_id(),
    };

    // Connectors occupy no area of their own; their geometry is derived from
    // the endpoints at render time.
    if ty == ObjectType::Connector {
        for key in [model::F_X, model::F_Y, model::F_WIDTH, model::F_HEIGHT] {
            fields.insert(key.into(), serde_json::json!(0.0));
        }
    }
    fields
        .entry(model::F_ROTATION.to_owned())
        .or_insert(serde_json::json!(0.0));
    fields
        .entry(model::F_Z_INDEX.to_owned())
        .or_insert(serde_json::json!(0));
    fields.insert(model::F_LAST_EDITED_BY.into(), serde_json::Value::String(user_id.to_owned()));

    let write = ApplyWrite { doc_id: object_id.clone(), fields, mode: WriteMode::Create, by: user_id.to_owned() };
    let stored = registry.apply(board_id, write).await?;
    info!(%board_id, object_id, ty = ty.as_str(), user_id, "object created");
    Ok((object_id, stored))
}

/// Merge a partial update into an object. Succeeds when the document is
/// missing by creating a skeleton carrying the patch.
///
/// # Errors
///
/// Validation failures and store/hub faults.
pub async fn update_object(
    registry: &HubRegistry,
    board_id: BoardId,
    user_id: &str,
    object_id: &str,
    mut patch: Fields,
) -> Result<Fields, MutationError> {
    model::validate_patch(&patch)?;
    patch.insert(model::F_LAST_EDITED_BY.into(), serde_json::Value::String(user_id.to_owned()));

    let write = ApplyWrite { doc_id: object_id.to_owned(), fields: patch, mode: WriteMode::Merge, by: user_id.to_owned() };
    let stored = registry.apply(board_id, write).await?;
    Ok(stored)
}

/// Idempotent delete; triggers the connector cascade in the hub.
///
/// # Errors
///
/// Store/hub faults only — deleting an absent object succeeds.
pub async fn delete_object(
    registry: &HubRegistry,
    board_id: BoardId,
    user_id: &str,
    object_id: &str,
) -> Result<(), MutationError> {
    registry.delete_object(board_id, object_id, user_id).await?;
    info!(%board_id, object_id, user_id, "object deleted");
    Ok(())
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Merge a presence write for `(board_id, user_id)`. Stamps `lastSeen` and
/// the deterministic cursor color server-side. Returns whether the write was
/// admitted (cursor moves inside the throttle window are silently dropped).
///
/// # Errors
///
/// Malformed cursor payloads and store faults.
pub async fn write_presence(
    store: &Store,
    tracker: &PresenceTracker,
    board_id: BoardId,
    user_id: &str,
    kind: PresenceWrite,
    mut fields: Fields,
) -> Result<bool, MutationError> {
    validate_presence_fields(&fields)?;

    if kind == PresenceWrite::Cursor && !tracker.admit_cursor(board_id, user_id) {
        return Ok(false);
    }

    fields.insert(presence::P_LAST_SEEN.into(), serde_json::json!(clock::now_ms()));
    fields.insert(
        presence::P_CURSOR_COLOR.into(),
        serde_json::Value::String(presence::cursor_color(user_id).to_owned()),
    );

    store
        .put(board_id, Collection::Presence, user_id, fields, WriteMode::Merge, user_id)
        .await?;
    Ok(true)
}

/// Remove a presence entry on explicit session end. Best-effort: a failed
/// delete is mopped up by the reaper.
pub async fn clear_presence(store: &Store, tracker: &PresenceTracker, board_id: BoardId, user_id: &str) {
    tracker.forget(board_id, user_id);
    let _ = store.delete(board_id, Collection::Presence, user_id).await;
}

fn validate_presence_fields(fields: &Fields) -> Result<(), ModelError> {
    if let Some(cursor) = fields.get(presence::P_CURSOR) {
        let ok = cursor.as_object().is_some_and(|c| {
            ["x", "y"].iter().all(|k| {
                c.get(*k)
                    .and_then(serde_json::Value::as_f64)
                    .is_some_and(f64::is_finite)
            })
        });
        if !ok {
            return Err(ModelError::WrongKind(presence::P_CURSOR));
        }
    }
    if let Some(name) = fields.get(presence::P_DISPLAY_NAME) {
        let s = name.as_str().ok_or(ModelError::WrongKind(presence::P_DISPLAY_NAME))?;
        if s.chars().count() > 200 {
            return Err(ModelError::TextTooLong { max: 200 });
        }
    }
    for key in [presence::P_LAST_SEEN, presence::P_CURSOR_COLOR] {
        if fields.contains_key(key) {
            return Err(ModelError::ServerStamped(key));
        }
    }
    Ok(())
}

// =============================================================================
// BOARD LIFECYCLE
// =============================================================================

/// Create a board and return its ID.
pub async fn create_board(store: &Store, name: &str, user_id: &str) -> BoardId {
    let board_id = Uuid::new_v4();
    store.create_board(board_id, name, user_id).await;
    board_id
}

/// Destroy a board, cascading objects and presence.
pub async fn destroy_board(store: &Store, board_id: BoardId) {
    store.destroy_board(board_id).await;
}

#[cfg(test)]
#[path = "mutation_test.rs"]
mod tests;
