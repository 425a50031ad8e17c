//! Shared application state.
//!
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! into the WebSocket session loop. Everything inside is either `Arc`-backed
//! or a pooled handle, so cloning is cheap. The store and the tracer are the
//! only process singletons; hubs are created lazily per board.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{AgentConfig, PresenceConfig};
use crate::hub::HubRegistry;
use crate::llm::LlmChat;
use crate::presence::PresenceTracker;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub hubs: HubRegistry,
    pub presence: PresenceTracker,
    pub presence_cfg: PresenceConfig,
    pub agent_cfg: AgentConfig,
    /// Optional LLM client. `None` if `ANTHROPIC_API_KEY` is not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub tracer: traces::Tracer,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Store,
        presence_cfg: PresenceConfig,
        agent_cfg: AgentConfig,
        llm: Option<Arc<dyn LlmChat>>,
        tracer: traces::Tracer,
    ) -> Self {
        let hubs = HubRegistry::new(store.clone(), presence_cfg);
        let presence = PresenceTracker::new(presence_cfg);
        Self { store, hubs, presence, presence_cfg, agent_cfg, llm, tracer }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        self.store.pool()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
