//! Observability traces for board agent runs.
//!
//! ARCHITECTURE
//! ============
//! One trace per agent invocation, one generation span per LLM turn. Spans
//! carry the model name and input/output token counts, and the trace
//! aggregates token totals so cost accounting never requires re-walking the
//! span list. Events buffer in memory and are shipped to the Langfuse
//! ingestion API in one batch at flush time (agent commit), so tracing adds
//! no latency inside the turn loop.
//!
//! The tracer is cleanly disabled when the environment carries no Langfuse
//! keys: every recording call is a no-op and `flush` succeeds vacuously.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{info, warn};
use uuid::Uuid;

const INGESTION_PATH: &str = "/api/public/ingestion";
const REQUEST_TIMEOUT_SECS: u64 = 15;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("observability not configured")]
    NotConfigured,
    #[error("ingestion request failed: {0}")]
    Request(String),
    #[error("ingestion rejected: status {status}")]
    Rejected { status: u16, body: String },
}

// =============================================================================
// CONFIG
// =============================================================================

/// Langfuse connection settings.
#[derive(Debug, Clone)]
pub struct LangfuseConfig {
    pub public_key: String,
    pub secret_key: String,
    pub host: String,
}

impl LangfuseConfig {
    /// Load from `LANGFUSE_PUBLIC_KEY` / `LANGFUSE_SECRET_KEY` /
    /// `LANGFUSE_HOST`. Returns `None` when any is missing.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let public_key = std::env::var("LANGFUSE_PUBLIC_KEY").ok()?;
        let secret_key = std::env::var("LANGFUSE_SECRET_KEY").ok()?;
        let host = std::env::var("LANGFUSE_HOST").ok()?;
        Some(Self { public_key, secret_key, host })
    }
}

// =============================================================================
// TOKEN ACCOUNTING
// =============================================================================

/// Accumulated token usage for one trace.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, input: u64, output: u64) {
        self.input_tokens += input;
        self.output_tokens += output;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

// =============================================================================
// EVENTS
// =============================================================================

#[derive(Debug, Clone, Serialize)]
struct IngestionEvent {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    body: serde_json::Value,
}

fn rfc3339_now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

// =============================================================================
// TRACER
// =============================================================================

struct TracerInner {
    http: reqwest::Client,
    config: LangfuseConfig,
    buffer: Mutex<Vec<IngestionEvent>>,
}

/// Shared tracer handle. Cheap to clone; `None` inner means disabled.
#[derive(Clone)]
pub struct Tracer {
    inner: Option<Arc<TracerInner>>,
}

impl Tracer {
    /// A tracer that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Build from the environment; disabled when keys are missing.
    #[must_use]
    pub fn from_env() -> Self {
        match LangfuseConfig::from_env() {
            Some(config) => {
                info!(host = %config.host, "observability tracing enabled");
                Self::with_config(config)
            }
            None => {
                warn!("Langfuse keys missing — observability tracing disabled");
                Self::disabled()
            }
        }
    }

    #[must_use]
    pub fn with_config(config: LangfuseConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { inner: Some(Arc::new(TracerInner { http, config, buffer: Mutex::new(Vec::new()) })) }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Open a trace for one agent invocation.
    #[must_use]
    pub fn start_trace(&self, name: &str, user_id: &str, board_id: &str, input: &str) -> Trace {
        let trace_id = Uuid::new_v4().to_string();
        if let Some(inner) = &self.inner {
            inner.push(IngestionEvent {
                id: Uuid::new_v4().to_string(),
                kind: "trace-create",
                timestamp: rfc3339_now(),
                body: serde_json::json!({
                    "id": trace_id,
                    "name": name,
                    "userId": user_id,
                    "metadata": { "boardId": board_id },
                    "input": input,
                }),
            });
        }
        Trace { tracer: self.clone(), trace_id, usage: Arc::new(Mutex::new(TokenUsage::default())) }
    }

    /// Ship everything buffered so far in one ingestion batch.
    ///
    /// # Errors
    ///
    /// Network failures and non-2xx ingestion responses. The buffer is
    /// drained regardless: a failed flush is reported, not retried, so agent
    /// commit latency stays bounded.
    pub async fn flush(&self) -> Result<(), TraceError> {
        let Some(inner) = &self.inner else {
            return Ok(());
        };
        let batch: Vec<IngestionEvent> = {
            let mut buffer = inner.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if batch.is_empty() {
            return Ok(());
        }
        inner.post_batch(&batch).await
    }

    /// Verify the ingestion endpoint is reachable and accepts our keys.
    ///
    /// # Errors
    ///
    /// `NotConfigured` when disabled; otherwise transport/status failures.
    pub async fn health_check(&self) -> Result<(), TraceError> {
        let Some(inner) = &self.inner else {
            return Err(TraceError::NotConfigured);
        };
        let probe = IngestionEvent {
            id: Uuid::new_v4().to_string(),
            kind: "event-create",
            timestamp: rfc3339_now(),
            body: serde_json::json!({
                "id": Uuid::new_v4().to_string(),
                "name": "observability-check",
            }),
        };
        inner.post_batch(&[probe]).await
    }

    /// Number of buffered events, for tests and diagnostics.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.inner
            .as_ref()
            .map_or(0, |inner| inner.buffer.lock().unwrap().len())
    }
}

impl TracerInner {
    fn push(&self, event: IngestionEvent) {
        self.buffer.lock().unwrap().push(event);
    }

    async fn post_batch(&self, batch: &[IngestionEvent]) -> Result<(), TraceError> {
        let url = format!("{}{INGESTION_PATH}", self.config.host.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.public_key, Some(&self.config.secret_key))
            .json(&serde_json::json!({ "batch": batch }))
            .send()
            .await
            .map_err(|e| TraceError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        // Langfuse answers 207 for partial acceptance; any 2xx means the
        // endpoint is reachable and the keys were accepted.
        if (200..300).contains(&status) {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TraceError::Rejected { status, body })
        }
    }
}

// =============================================================================
// TRACE HANDLE
// =============================================================================

/// One agent invocation's trace. Records generation spans and aggregates
/// token usage.
pub struct Trace {
    tracer: Tracer,
    trace_id: String,
    usage: Arc<Mutex<TokenUsage>>,
}

/// One LLM turn, recorded after the call returns.
#[derive(Debug, Clone)]
pub struct GenerationSpan {
    pub turn: usize,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
    pub stop_reason: String,
}

impl Trace {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.trace_id
    }

    /// Record one LLM turn and fold its tokens into the trace totals.
    pub fn generation(&self, span: &GenerationSpan) {
        self.usage
            .lock()
            .unwrap()
            .add(span.input_tokens, span.output_tokens);

        let Some(inner) = &self.tracer.inner else {
            return;
        };
        inner.push(IngestionEvent {
            id: Uuid::new_v4().to_string(),
            kind: "generation-create",
            timestamp: rfc3339_now(),
            body: serde_json::json!({
                "id": Uuid::new_v4().to_string(),
                "traceId": self.trace_id,
                "name": format!("turn-{}", span.turn),
                "model": span.model,
                "startTime": ms_to_rfc3339(span.started_at_ms),
                "endTime": ms_to_rfc3339(span.ended_at_ms),
                "usage": {
                    "input": span.input_tokens,
                    "output": span.output_tokens,
                },
                "metadata": { "stopReason": span.stop_reason },
            }),
        });
    }

    /// Close the trace with its final output summary.
    pub fn finish(&self, output: &str, status: &str) {
        let usage = self.usage();
        let Some(inner) = &self.tracer.inner else {
            return;
        };
        inner.push(IngestionEvent {
            id: Uuid::new_v4().to_string(),
            kind: "trace-create",
            timestamp: rfc3339_now(),
            body: serde_json::json!({
                "id": self.trace_id,
                "output": output,
                "metadata": {
                    "status": status,
                    "inputTokens": usage.input_tokens,
                    "outputTokens": usage.output_tokens,
                    "totalTokens": usage.total(),
                },
            }),
        });
    }

    /// Token totals accumulated so far.
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        *self.usage.lock().unwrap()
    }
}

fn ms_to_rfc3339(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
