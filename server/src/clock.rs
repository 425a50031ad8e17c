//! Server clock and object identifiers.
//!
//! DESIGN
//! ======
//! `now_ms` is the only source of `updated_at` stamps. Wall-clock time can
//! step backwards (NTP); stamps must not, because LWW convergence depends on
//! monotonic non-decreasing timestamps per object. A process-wide atomic max
//! enforces that: a call never observes a smaller value than any earlier call.
//!
//! Object IDs are opaque 20-symbol strings from a 62-symbol alphabet
//! (~119 bits), generated server-side. Clients may propose their own IDs on
//! create; `is_valid_object_id` is the syntactic gate.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const ID_LEN: usize = 20;

const ID_MIN_LEN: usize = 8;
const ID_MAX_LEN: usize = 64;

static LAST_MS: AtomicI64 = AtomicI64::new(0);

/// Current time as milliseconds since the Unix epoch, monotonic non-decreasing
/// across calls within this process.
#[must_use]
pub fn now_ms() -> i64 {
    let wall = {
        let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
            return LAST_MS.load(Ordering::SeqCst);
        };
        i64::try_from(dur.as_millis()).unwrap_or(0)
    };
    LAST_MS.fetch_max(wall, Ordering::SeqCst).max(wall)
}

/// Generate a fresh opaque object ID.
#[must_use]
pub fn new_object_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LEN)
        .map(|_| {
            let idx = rng.random_range(0..ID_ALPHABET.len());
            ID_ALPHABET[idx] as char
        })
        .collect()
}

/// Whether a client-proposed object ID is syntactically acceptable.
#[must_use]
pub fn is_valid_object_id(id: &str) -> bool {
    (ID_MIN_LEN..=ID_MAX_LEN).contains(&id.len())
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_monotonic() {
        let mut prev = now_ms();
        for _ in 0..1000 {
            let next = now_ms();
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn object_ids_are_well_formed() {
        for _ in 0..100 {
            let id = new_object_id();
            assert_eq!(id.len(), ID_LEN);
            assert!(is_valid_object_id(&id));
        }
    }

    #[test]
    fn object_ids_do_not_collide_in_practice() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(new_object_id()));
        }
    }

    #[test]
    fn client_id_validation() {
        assert!(is_valid_object_id("abc12345"));
        assert!(is_valid_object_id("client-proposed_ID-42"));
        assert!(!is_valid_object_id("short"));
        assert!(!is_valid_object_id(""));
        assert!(!is_valid_object_id("has space in it"));
        assert!(!is_valid_object_id(&"x".repeat(65)));
    }
}
