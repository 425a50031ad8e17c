//! Presence — ephemeral cursor/online state with throttle and reaper.
//!
//! DESIGN
//! ======
//! Cursor moves arrive at pointer frequency; the tracker admits at most one
//! write per user per `THROTTLE_MS` and silently drops the rest (the next
//! admitted move supersedes them). A keepalive refreshes `lastSeen` on a
//! slower cadence, so an idle-but-connected user never goes stale.
//!
//! Staleness has two horizons: entries older than `STALE` are hidden from
//! readers immediately, and the per-board reaper physically removes entries
//! older than `STALE_STORE`. Presence never surfaces errors — a stale entry
//! is the only observable symptom of a failed write.
//!
//! Cursor colors are a deterministic function of the user id (FNV-1a over a
//! fixed palette). `DefaultHasher` is seeded per process and would hand a
//! user a new color every session, so the hash is pinned here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{debug, warn};

use crate::clock;
use crate::config::PresenceConfig;
use crate::model::Fields;
use crate::store::{BoardId, Collection, DocId, Store};

/// Wire field names of a presence entry.
pub const P_DISPLAY_NAME: &str = "displayName";
pub const P_CURSOR: &str = "cursor";
pub const P_CURSOR_COLOR: &str = "cursorColor";
pub const P_LAST_SEEN: &str = "lastSeen";

const PALETTE: [&str; 10] = [
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6", "#bcf60c", "#008080",
];

// =============================================================================
// CURSOR COLOR
// =============================================================================

/// Deterministic cursor color for a user, stable across sessions.
#[must_use]
pub fn cursor_color(user_id: &str) -> &'static str {
    PALETTE[(fnv1a(user_id.as_bytes()) as usize) % PALETTE.len()]
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

// =============================================================================
// THROTTLE
// =============================================================================

/// Per-user cursor write admission. Cheap to clone.
#[derive(Clone)]
pub struct PresenceTracker {
    last_admitted: Arc<Mutex<HashMap<(BoardId, String), Instant>>>,
    cfg: PresenceConfig,
}

impl PresenceTracker {
    #[must_use]
    pub fn new(cfg: PresenceConfig) -> Self {
        Self { last_admitted: Arc::new(Mutex::new(HashMap::new())), cfg }
    }

    /// Whether a cursor write from this user may proceed now. Admission
    /// records the write; a rejected write is dropped, not queued.
    pub fn admit_cursor(&self, board_id: BoardId, user_id: &str) -> bool {
        self.admit_cursor_at(board_id, user_id, Instant::now())
    }

    fn admit_cursor_at(&self, board_id: BoardId, user_id: &str, now: Instant) -> bool {
        let mut map = self.last_admitted.lock().unwrap();
        let key = (board_id, user_id.to_owned());
        match map.get(&key) {
            Some(last) if now.duration_since(*last) < self.cfg.throttle => false,
            _ => {
                map.insert(key, now);
                true
            }
        }
    }

    /// Forget throttle state for a departed session.
    pub fn forget(&self, board_id: BoardId, user_id: &str) {
        let mut map = self.last_admitted.lock().unwrap();
        map.remove(&(board_id, user_id.to_owned()));
    }
}

// =============================================================================
// STALENESS
// =============================================================================

/// Whether a presence entry is fresh enough to show to readers.
#[must_use]
pub fn is_fresh(fields: &Fields, cfg: &PresenceConfig) -> bool {
    is_fresh_at(fields, cfg, clock::now_ms())
}

fn is_fresh_at(fields: &Fields, cfg: &PresenceConfig, now_ms: i64) -> bool {
    fields
        .get(P_LAST_SEEN)
        .and_then(serde_json::Value::as_i64)
        .is_some_and(|last_seen| now_ms - last_seen <= cfg.stale_ms)
}

/// Remove entries older than the store horizon. Called from the hub's reap
/// tick; failures are logged and retried on the next tick.
pub async fn reap_stale(
    store: &Store,
    board_id: BoardId,
    presence_docs: &HashMap<DocId, Fields>,
    cfg: &PresenceConfig,
) {
    let now = clock::now_ms();
    let expired: Vec<&DocId> = presence_docs
        .iter()
        .filter(|(_, fields)| {
            let last_seen = fields
                .get(P_LAST_SEEN)
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(0);
            now - last_seen > cfg.stale_store_ms
        })
        .map(|(user_id, _)| user_id)
        .collect();

    for user_id in expired {
        debug!(%board_id, user_id, "reaping stale presence entry");
        if let Err(e) = store.delete(board_id, Collection::Presence, user_id).await {
            warn!(error = %e, %board_id, user_id, "presence reap failed");
        }
    }
}
