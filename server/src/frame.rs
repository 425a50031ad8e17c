//! Frame — the wire message for the WebSocket surface.
//!
//! DESIGN
//! ======
//! Every client exchange is a Frame. Clients send request frames, the server
//! dispatches by syscall prefix ("board:", "object:", "presence:") and replies
//! with done/error frames correlated via `parent_id`. Server-initiated
//! deliveries (object and presence change events) are request frames with no
//! parent.
//!
//! - Flat data: payload is always `Map<String, Value>`, never nested frames.
//! - The WS handler routes on the syscall prefix and never inspects `data`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock;

/// Frame data key for error messages.
pub const FRAME_MESSAGE: &str = "message";

/// Frame data key for grepable error codes.
pub const FRAME_CODE: &str = "code";

/// Frame data key for the retryable flag on error frames.
pub const FRAME_RETRYABLE: &str = "retryable";

/// Flat key-value payload. Alias to reduce noise in signatures.
pub type Data = HashMap<String, serde_json::Value>;

/// Lifecycle position of a frame in a request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Request from a client, or an unsolicited server delivery.
    Request,
    /// Successful terminal response.
    Done,
    /// Error terminal response.
    Error,
}

fn default_status() -> Status {
    Status::Request
}

/// The universal message type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Unique identifier for this frame.
    pub id: Uuid,
    /// ID of the request frame this is replying to, if any.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Milliseconds since Unix epoch. Set automatically at construction.
    #[serde(default)]
    pub ts: i64,
    /// Board this frame belongs to, if applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<Uuid>,
    /// Sender identifier (user id string or server label).
    #[serde(default)]
    pub from: Option<String>,
    /// Namespaced operation name, e.g. `"object:create"`.
    pub syscall: String,
    /// Lifecycle position of this frame.
    #[serde(default = "default_status")]
    pub status: Status,
    /// Flat key-value payload specific to the syscall.
    #[serde(default)]
    pub data: Data,
}

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error frames.
pub trait ErrorCode: std::fmt::Display {
    /// Short uppercase error code included in the `code` field of error frames.
    fn error_code(&self) -> &'static str;

    /// Whether the client should automatically retry after receiving this error.
    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// CONSTRUCTORS
// =============================================================================

impl Frame {
    /// Create a request frame. Entry point for every syscall and delivery.
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: clock::now_ms(),
            board_id: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    /// Create a done response. Terminal, carries no data.
    #[must_use]
    pub fn done(&self) -> Self {
        self.reply(Status::Done, Data::new())
    }

    /// Create a done response carrying payload data. Terminal.
    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.reply(Status::Done, data)
    }

    /// Create an error response from a plain string. Terminal.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(message.into()));
        self.reply(Status::Error, data)
    }

    /// Create a structured error response from a typed error. Terminal.
    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let mut data = Data::new();
        data.insert(FRAME_CODE.into(), serde_json::Value::String(err.error_code().to_string()));
        data.insert(FRAME_MESSAGE.into(), serde_json::Value::String(err.to_string()));
        data.insert(FRAME_RETRYABLE.into(), serde_json::Value::Bool(err.retryable()));
        self.reply(Status::Error, data)
    }

    /// Build a reply frame. Inherits `parent_id`, `board_id`, `from`, and `syscall`.
    fn reply(&self, status: Status, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: Some(self.id),
            ts: clock::now_ms(),
            board_id: self.board_id,
            from: self.from.clone(),
            syscall: self.syscall.clone(),
            status,
            data,
        }
    }
}

// =============================================================================
// BUILDERS
// =============================================================================

impl Frame {
    /// Set the `board_id` field on this frame.
    #[must_use]
    pub fn with_board_id(mut self, board_id: Uuid) -> Self {
        self.board_id = Some(board_id);
        self
    }

    /// Set the `from` sender identifier field.
    #[must_use]
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// Insert an arbitrary key-value pair into the frame payload.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// ROUTING
// =============================================================================

impl Frame {
    /// Extract the syscall prefix (everything before the first ':').
    #[must_use]
    pub fn prefix(&self) -> &str {
        let Some((prefix, _)) = self.syscall.split_once(':') else {
            return &self.syscall;
        };
        prefix
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
