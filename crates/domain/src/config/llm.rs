use serde::{Deserialize, Serialize};

/// LLM provider endpoint and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (chat completions + embeddings).
    #[serde(default = "d_endpoint")]
    pub endpoint: String,
    /// Environment variable holding the API key. Unset = no auth header.
    #[serde(default = "d_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_chat_model")]
    pub chat_model: String,
    /// Small model used by the router's LLM classification layer.
    #[serde(default = "d_intent_model")]
    pub intent_model: String,
    #[serde(default = "d_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "d_chat_timeout")]
    pub chat_timeout_secs: u64,
    #[serde(default = "d_intent_timeout")]
    pub intent_timeout_secs: u64,
    /// Bounded retry attempts on transport errors only.
    #[serde(default = "d_max_retries")]
    pub max_transport_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: d_endpoint(),
            api_key_env: d_api_key_env(),
            chat_model: d_chat_model(),
            intent_model: d_intent_model(),
            embedding_model: d_embedding_model(),
            chat_timeout_secs: d_chat_timeout(),
            intent_timeout_secs: d_intent_timeout(),
            max_transport_retries: d_max_retries(),
        }
    }
}

fn d_endpoint() -> String {
    "http://localhost:11434/v1".into()
}
fn d_api_key_env() -> String {
    "AVIARY_API_KEY".into()
}
fn d_chat_model() -> String {
    "qwen2.5:14b".into()
}
fn d_intent_model() -> String {
    "qwen2.5:3b".into()
}
fn d_embedding_model() -> String {
    "nomic-embed-text".into()
}
fn d_chat_timeout() -> u64 {
    30
}
fn d_intent_timeout() -> u64 {
    5
}
fn d_max_retries() -> u32 {
    2
}
