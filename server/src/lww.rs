//! Last-writer-wins convergence rule.
//!
//! DESIGN
//! ======
//! Every committed field carries a `WriteStamp` assigned by the authoritative
//! store at commit time (never by clients). For two writes to the same field
//! the larger timestamp wins; equal timestamps fall back to lexicographic
//! order of the writer id, so every replica that sees both stamps picks the
//! same winner. Field granularity means a merge write only competes for the
//! fields it carries.

use serde::{Deserialize, Serialize};

/// Commit stamp for a single field write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteStamp {
    /// Milliseconds since the Unix epoch, assigned by the server clock.
    pub at_ms: i64,
    /// Writer identity (user id or agent id), used only to break ties.
    pub by: String,
}

impl WriteStamp {
    #[must_use]
    pub fn new(at_ms: i64, by: impl Into<String>) -> Self {
        Self { at_ms, by: by.into() }
    }
}

/// Whether `incoming` beats `current` for the same field.
///
/// Larger timestamp wins; cross-writer ties go to the lexicographically
/// larger writer id. A same-writer tie wins: two writes from one writer in
/// the same millisecond arrive already serialized, so the later one
/// supersedes (and replaying an identical write is harmless).
#[must_use]
pub fn wins(incoming: &WriteStamp, current: &WriteStamp) -> bool {
    match incoming.at_ms.cmp(&current.at_ms) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => incoming.by >= current.by,
    }
}
