//! Runtime tunables loaded from environment variables.
//!
//! Every knob has a compiled-in default so a bare environment boots a
//! working server; deployments override individual values. Parsing is
//! best-effort: a malformed value falls back to the default rather than
//! aborting startup.

use std::time::Duration;

const DEFAULT_THROTTLE_MS: u64 = 60;
const DEFAULT_STALE_MS: i64 = 30_000;
const DEFAULT_STALE_STORE_MS: i64 = 60_000;
const DEFAULT_REAP_INTERVAL_MS: u64 = 10_000;
const DEFAULT_PER_TURN_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_TURNS: usize = 8;
const DEFAULT_PAD_SIDE: f64 = 30.0;
const DEFAULT_PAD_TOP: f64 = 70.0;
const DEFAULT_PAD_BOTTOM: f64 = 30.0;
const DEFAULT_FLUSH_INTERVAL_MS: u64 = 100;
const DEFAULT_MAX_TEXT_LEN: usize = 10_000;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Presence timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct PresenceConfig {
    /// Minimum spacing between admitted cursor writes per user.
    pub throttle: Duration,
    /// Entries older than this are hidden from readers.
    pub stale_ms: i64,
    /// Entries older than this are physically removed by the reaper.
    pub stale_store_ms: i64,
    /// Reaper cadence per active board.
    pub reap_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(DEFAULT_THROTTLE_MS),
            stale_ms: DEFAULT_STALE_MS,
            stale_store_ms: DEFAULT_STALE_STORE_MS,
            reap_interval: Duration::from_millis(DEFAULT_REAP_INTERVAL_MS),
        }
    }
}

impl PresenceConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            throttle: Duration::from_millis(env_parse("THROTTLE_MS", DEFAULT_THROTTLE_MS)),
            stale_ms: env_parse("STALE_MS", DEFAULT_STALE_MS),
            stale_store_ms: env_parse("STALE_STORE_MS", DEFAULT_STALE_STORE_MS),
            reap_interval: Duration::from_millis(env_parse("REAP_INTERVAL_MS", DEFAULT_REAP_INTERVAL_MS)),
        }
    }
}

/// Agent executor knobs.
#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    /// Upper bound on a single LLM turn.
    pub per_turn_timeout: Duration,
    /// Hard ceiling on turns per invocation.
    pub max_turns: usize,
    /// Frame auto-fit padding: left/right, top (title band), bottom.
    pub pad_side: f64,
    pub pad_top: f64,
    pub pad_bottom: f64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            per_turn_timeout: Duration::from_secs(DEFAULT_PER_TURN_TIMEOUT_SECS),
            max_turns: DEFAULT_MAX_TURNS,
            pad_side: DEFAULT_PAD_SIDE,
            pad_top: DEFAULT_PAD_TOP,
            pad_bottom: DEFAULT_PAD_BOTTOM,
        }
    }
}

impl AgentConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            per_turn_timeout: Duration::from_secs(env_parse("PER_TURN_TIMEOUT_SECS", DEFAULT_PER_TURN_TIMEOUT_SECS)),
            max_turns: env_parse("MAX_TURNS", DEFAULT_MAX_TURNS),
            pad_side: env_parse("PAD_SIDE", DEFAULT_PAD_SIDE),
            pad_top: env_parse("PAD_TOP", DEFAULT_PAD_TOP),
            pad_bottom: env_parse("PAD_BOTTOM", DEFAULT_PAD_BOTTOM),
        }
    }
}

/// Store durability knobs.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Dirty-set flush cadence.
    pub flush_interval: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS) }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self { flush_interval: Duration::from_millis(env_parse("FLUSH_INTERVAL_MS", DEFAULT_FLUSH_INTERVAL_MS)) }
    }
}

/// Maximum accepted length for any text field.
#[must_use]
pub fn max_text_len() -> usize {
    DEFAULT_MAX_TEXT_LEN
}
