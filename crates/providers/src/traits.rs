use av_domain::error::Result;
use av_domain::message::{Message, ToolCall, ToolDescriptor};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Token usage for one completion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The result of one chat call.
///
/// `tool_calls` contains only *structured* calls. Providers that embed tool
/// calls in text (`[Tool: name(args)]`) leave them inside `content`; the
/// caller extracts them with [`crate::textcalls::extract`]. Both forms must
/// be accepted.
#[derive(Debug, Clone, Default)]
pub struct ChatOutcome {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
///
/// Error mapping contract: transport failures surface as
/// `Error::Transport` (and only those are retried, with bounded attempts);
/// auth, quota, context-length, and other provider-side failures surface
/// as `Error::Provider` and propagate.
#[async_trait::async_trait]
pub trait ChatProvider: Send + Sync {
    /// Chat with function-calling: the model may answer, call tools, or both.
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChatOutcome>;

    /// Plain chat without tools.
    async fn chat(&self, messages: &[Message]) -> Result<ChatOutcome> {
        self.chat_with_tools(messages, &[]).await
    }

    /// Text embeddings, one vector per input.
    async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// A unique identifier for this provider instance.
    fn provider_id(&self) -> &str;
}
