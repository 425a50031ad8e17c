//! LLM client for the board agent.
//!
//! The agent talks to the Anthropic Messages API. `from_env` is non-fatal
//! at startup: without `ANTHROPIC_API_KEY` the agent endpoint reports the
//! feature as unconfigured and everything else keeps working.

pub mod anthropic;
pub mod types;

pub use types::{ChatResponse, Content, ContentBlock, LlmChat, LlmError, Message, Tool};

const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250929";

pub struct LlmClient {
    inner: anthropic::AnthropicClient,
}

impl LlmClient {
    /// Build a client from `ANTHROPIC_API_KEY` and optional `AGENT_MODEL`.
    ///
    /// # Errors
    ///
    /// Fails when the key is missing or the HTTP client cannot be built.
    pub fn from_env() -> Result<Self, LlmError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| LlmError::MissingApiKey { var: "ANTHROPIC_API_KEY".into() })?;
        let model = std::env::var("AGENT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.into());
        Ok(Self { inner: anthropic::AnthropicClient::new(api_key, model)? })
    }
}

#[async_trait::async_trait]
impl LlmChat for LlmClient {
    async fn chat(
        &self,
        max_tokens: u32,
        system: &str,
        messages: &[Message],
        tools: Option<&[Tool]>,
    ) -> Result<ChatResponse, LlmError> {
        self.inner.chat(max_tokens, system, messages, tools).await
    }

    fn model(&self) -> &str {
        self.inner.model_name()
    }
}
