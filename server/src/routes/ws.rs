//! WebSocket handler — frame dispatch and board event delivery.
//!
//! DESIGN
//! ======
//! On upgrade (ticket-authenticated), the session enters a `select!` loop:
//! incoming client frames are parsed and dispatched by syscall prefix, and
//! board events fanned out by the hub are converted to delivery frames.
//! Handlers return an `Outcome`; the dispatch layer owns every outbound
//! concern. Mutation results are NOT broadcast here — the hub's store feed
//! delivers every committed write to every subscriber, the sender included,
//! so the reply to the sender is only an acknowledgement.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `session:connected` with `client_id`
//! 2. `board:join` → hub subscription; the first deliveries are the full
//!    object snapshot as `object:added` frames
//! 3. Mutations and presence writes → deltas to every subscriber
//! 4. Close → hub unsubscribe + presence clear

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth;
use crate::frame::{Data, Frame, Status};
use crate::hub::{self, BoardEvent};
use crate::model::Fields;
use crate::mutation::{self, PresenceWrite};
use crate::state::AppState;
use crate::store::{BoardId, ChangeEvent, ChangeKind};

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. Deliveries ride the hub's event
/// channel; handlers only ever answer the sender.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// No reply at all (throttled cursor writes).
    Silent,
}

/// Per-connection session state.
struct WsSession {
    client_id: Uuid,
    user_id: Uuid,
    board: Option<BoardId>,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(ticket) = params.get("ticket") else {
        return (StatusCode::UNAUTHORIZED, "ticket required").into_response();
    };

    let user_id = match auth::consume_ws_ticket(state.pool(), ticket).await {
        Ok(Some(uid)) => uid,
        Ok(None) => return (StatusCode::UNAUTHORIZED, "invalid or expired ticket").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "ws ticket validation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "ticket validation error").into_response();
        }
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, user_id))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user_id: Uuid) {
    let mut session = WsSession { client_id: Uuid::new_v4(), user_id, board: None };
    let (event_tx, mut event_rx) = mpsc::channel::<BoardEvent>(hub::subscriber_queue_capacity());

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("client_id", session.client_id.to_string())
        .with_data("user_id", user_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(client_id = %session.client_id, %user_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    WsMessage::Text(text) => {
                        let replies = process_inbound_text(&state, &mut session, &event_tx, &text).await;
                        for frame in replies {
                            let _ = send_frame(&mut socket, &frame).await;
                        }
                    }
                    WsMessage::Close(_) => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                let Some(event) = event else { break };
                if let Some(board_id) = session.board {
                    for frame in event_frames(board_id, event) {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    leave_board(&state, &mut session).await;
    info!(client_id = %session.client_id, "ws: client disconnected");
}

async fn leave_board(state: &AppState, session: &mut WsSession) {
    if let Some(board_id) = session.board.take() {
        state.hubs.unsubscribe(board_id, session.client_id).await;
        mutation::clear_presence(&state.store, &state.presence, board_id, &session.user_id.to_string()).await;
    }
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame, returning frames for the
/// sender. Split from the socket loop so tests can drive sessions directly.
async fn process_inbound_text(
    state: &AppState,
    session: &mut WsSession,
    event_tx: &mpsc::Sender<BoardEvent>,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(client_id = %session.client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the authenticated user as the sender.
    req.from = Some(session.user_id.to_string());

    let prefix = req.prefix();
    if prefix != "presence" {
        info!(client_id = %session.client_id, syscall = %req.syscall, "ws: recv frame");
    }

    let result = match prefix {
        "board" => handle_board(state, session, event_tx, &req).await,
        "object" => handle_object(state, session, &req).await,
        "presence" => handle_presence(state, session, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Silent) => vec![],
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// BOARD HANDLERS
// =============================================================================

async fn handle_board(
    state: &AppState,
    session: &mut WsSession,
    event_tx: &mpsc::Sender<BoardEvent>,
    req: &Frame,
) -> Result<Outcome, Frame> {
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "join" => {
            let Some(board_id) = req.board_id.or_else(|| {
                req.data
                    .get("board_id")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok())
            }) else {
                return Err(req.error("board_id required"));
            };

            // Leave the current board first; one subscription per session.
            leave_board(state, session).await;

            if let Err(e) = state
                .hubs
                .subscribe(board_id, session.client_id, event_tx.clone())
                .await
            {
                return Err(req.error_from(&e));
            }
            session.board = Some(board_id);

            let display_name = req
                .data
                .get("displayName")
                .and_then(|v| v.as_str())
                .unwrap_or("anonymous");
            let fields: Fields = [("displayName".to_owned(), serde_json::json!(display_name))]
                .into_iter()
                .collect();
            let _ = mutation::write_presence(
                &state.store,
                &state.presence,
                board_id,
                &session.user_id.to_string(),
                PresenceWrite::Join,
                fields,
            )
            .await;

            Ok(Outcome::Done)
        }
        "part" => {
            leave_board(state, session).await;
            Ok(Outcome::Done)
        }
        "create" => {
            let name = req
                .data
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled Board");
            let board_id = mutation::create_board(&state.store, name, &session.user_id.to_string()).await;
            let mut data = Data::new();
            data.insert("board_id".into(), serde_json::json!(board_id));
            data.insert("name".into(), serde_json::json!(name));
            Ok(Outcome::Reply(data))
        }
        "destroy" => {
            let Some(board_id) = req
                .data
                .get("board_id")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
            else {
                return Err(req.error("board_id required"));
            };
            mutation::destroy_board(&state.store, board_id).await;
            Ok(Outcome::Done)
        }
        _ => Err(req.error(format!("unknown board op: {op}"))),
    }
}

// =============================================================================
// OBJECT HANDLERS
// =============================================================================

async fn handle_object(state: &AppState, session: &WsSession, req: &Frame) -> Result<Outcome, Frame> {
    let Some(board_id) = session.board else {
        return Err(req.error("must join a board first"));
    };
    let user_id = session.user_id.to_string();
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "create" => {
            let proposed_id = req
                .data
                .get("id")
                .and_then(|v| v.as_str())
                .map(str::to_owned);
            let fields: Fields = req
                .data
                .iter()
                .filter(|(key, _)| key.as_str() != "id")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            match mutation::create_object(&state.hubs, &state.store, board_id, &user_id, proposed_id, fields).await {
                Ok((object_id, _)) => {
                    let mut data = Data::new();
                    data.insert("id".into(), serde_json::json!(object_id));
                    Ok(Outcome::Reply(data))
                }
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "update" => {
            let Some(object_id) = req.data.get("id").and_then(|v| v.as_str()) else {
                return Err(req.error("id required"));
            };
            let patch: Fields = req
                .data
                .iter()
                .filter(|(key, _)| key.as_str() != "id")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();

            match mutation::update_object(&state.hubs, board_id, &user_id, object_id, patch).await {
                Ok(_) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "delete" => {
            let Some(object_id) = req.data.get("id").and_then(|v| v.as_str()) else {
                return Err(req.error("id required"));
            };
            match mutation::delete_object(&state.hubs, board_id, &user_id, object_id).await {
                Ok(()) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        _ => Err(req.error(format!("unknown object op: {op}"))),
    }
}

// =============================================================================
// PRESENCE HANDLERS
// =============================================================================

async fn handle_presence(state: &AppState, session: &WsSession, req: &Frame) -> Result<Outcome, Frame> {
    let Some(board_id) = session.board else {
        // Presence before joining is meaningless; drop it silently.
        return Ok(Outcome::Silent);
    };
    let user_id = session.user_id.to_string();
    let op = req.syscall.split_once(':').map_or("", |(_, op)| op);

    match op {
        "cursor" => {
            let x = req
                .data
                .get("x")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0);
            let y = req
                .data
                .get("y")
                .and_then(serde_json::Value::as_f64)
                .unwrap_or(0.0);
            let fields: Fields = [("cursor".to_owned(), serde_json::json!({ "x": x, "y": y }))]
                .into_iter()
                .collect();
            match mutation::write_presence(&state.store, &state.presence, board_id, &user_id, PresenceWrite::Cursor, fields)
                .await
            {
                // Admitted or throttled — either way, no reply traffic.
                Ok(_) => Ok(Outcome::Silent),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "keepalive" => {
            match mutation::write_presence(
                &state.store,
                &state.presence,
                board_id,
                &user_id,
                PresenceWrite::Keepalive,
                Fields::new(),
            )
            .await
            {
                Ok(_) => Ok(Outcome::Done),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        "leave" => {
            mutation::clear_presence(&state.store, &state.presence, board_id, &user_id).await;
            Ok(Outcome::Done)
        }
        _ => Err(req.error(format!("unknown presence op: {op}"))),
    }
}

// =============================================================================
// DELIVERY
// =============================================================================

/// Convert one hub delivery into outbound frames.
fn event_frames(board_id: BoardId, event: BoardEvent) -> Vec<Frame> {
    match event {
        BoardEvent::Objects(events) => events
            .into_iter()
            .map(|e| object_event_frame(board_id, e))
            .collect(),
        BoardEvent::Presence(events) => events
            .into_iter()
            .map(|e| presence_event_frame(board_id, e))
            .collect(),
    }
}

fn object_event_frame(board_id: BoardId, event: ChangeEvent) -> Frame {
    let syscall = match event.kind {
        ChangeKind::Added => "object:added",
        ChangeKind::Modified => "object:modified",
        ChangeKind::Removed => "object:removed",
    };
    let mut data = Data::new();
    data.insert("id".into(), serde_json::json!(event.doc_id));
    if event.kind != ChangeKind::Removed {
        data.insert("fields".into(), serde_json::json!(event.fields));
    }
    Frame::request(syscall, data).with_board_id(board_id)
}

fn presence_event_frame(board_id: BoardId, event: ChangeEvent) -> Frame {
    let syscall = match event.kind {
        ChangeKind::Added | ChangeKind::Modified => "presence:changed",
        ChangeKind::Removed => "presence:removed",
    };
    let mut data = Data::new();
    data.insert("userId".into(), serde_json::json!(event.doc_id));
    if event.kind != ChangeKind::Removed {
        data.insert("fields".into(), serde_json::json!(event.fields));
    }
    Frame::request(syscall, data).with_board_id(board_id)
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    let is_presence = frame.syscall.starts_with("presence:");
    if !is_presence {
        if frame.status == Status::Error {
            let code = frame.data.get("code").and_then(|v| v.as_str()).unwrap_or("-");
            let message = frame
                .data
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("-");
            warn!(syscall = %frame.syscall, code, message, "ws: send frame status=Error");
        } else {
            info!(syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
        }
    }
    socket
        .send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
