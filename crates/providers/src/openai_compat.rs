//! OpenAI-compatible adapter.
//!
//! Works with OpenAI, Ollama, vLLM, LM Studio, and any other endpoint that
//! follows the chat-completions contract. Non-streaming: the agent loop
//! consumes whole responses and emits its own event stream.

use av_domain::error::{Error, Result};
use av_domain::message::{Message, Role, ToolCall, ToolDescriptor};
use serde_json::Value;
use std::time::Duration;

use crate::traits::{ChatOutcome, ChatProvider, Usage};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiCompatProvider {
    id: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    embedding_model: String,
    max_transport_retries: u32,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    pub fn new(
        id: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        embedding_model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        max_transport_retries: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("building HTTP client: {e}")))?;

        Ok(Self {
            id: id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            embedding_model: embedding_model.into(),
            max_transport_retries,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn build_chat_body(&self, messages: &[Message], tools: &[ToolDescriptor]) -> Value {
        let messages: Vec<Value> = messages.iter().map(msg_to_wire).collect();
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });
        if !tools.is_empty() {
            let tools: Vec<Value> = tools.iter().map(tool_to_wire).collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }

    /// POST with bounded retry on transport errors only. Provider-side
    /// failures (auth, quota, context length) propagate immediately.
    async fn post_with_retry(&self, url: &str, body: &Value) -> Result<Value> {
        let mut attempt = 0;
        loop {
            match self.post_once(url, body).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_transport_retries => {
                    attempt += 1;
                    tracing::warn!(
                        provider = %self.id,
                        attempt,
                        error = %e,
                        "transport error, retrying"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .authed_post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("{url}: {e}"))
                } else {
                    Error::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_status_error(&self.id, status.as_u16(), &text));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| Error::Transport(format!("decoding response: {e}")))
    }
}

/// Map an HTTP error status onto the provider error taxonomy.
fn map_status_error(provider: &str, status: u16, body: &str) -> Error {
    let message = match status {
        401 | 403 => format!("authentication failed: {body}"),
        429 => format!("quota exhausted: {body}"),
        413 => format!("context length exceeded: {body}"),
        _ if body.contains("context_length") || body.contains("maximum context") => {
            format!("context length exceeded: {body}")
        }
        _ => format!("HTTP {status}: {body}"),
    };
    Error::provider(provider, message)
}

#[async_trait::async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDescriptor],
    ) -> Result<ChatOutcome> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_chat_body(messages, tools);
        let json = self.post_with_retry(&url, &body).await?;
        parse_chat_response(&self.id, &json)
    }

    async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": texts,
        });
        let json = self.post_with_retry(&url, &body).await?;

        let data = json
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::provider(self.id.as_str(), "embeddings response missing 'data'"))?;

        let mut out = Vec::with_capacity(data.len());
        for item in data {
            let vec = item
                .get("embedding")
                .and_then(Value::as_array)
                .ok_or_else(|| Error::provider(self.id.as_str(), "embedding item missing vector"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            out.push(vec);
        }
        Ok(out)
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire translation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_wire(msg: &Message) -> Value {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    serde_json::json!({ "role": role, "content": msg.content })
}

fn tool_to_wire(tool: &ToolDescriptor) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

/// Parse a chat-completions response into a [`ChatOutcome`].
fn parse_chat_response(provider: &str, json: &Value) -> Result<ChatOutcome> {
    let message = json
        .pointer("/choices/0/message")
        .ok_or_else(|| Error::provider(provider, "response missing choices[0].message"))?;

    let content = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let name = call
                .pointer("/function/name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if name.is_empty() {
                tracing::warn!(provider, "skipping tool call with empty function name");
                continue;
            }
            let arguments = call
                .pointer("/function/arguments")
                .and_then(Value::as_str)
                .unwrap_or("{}");
            tool_calls.push(ToolCall {
                name: name.to_owned(),
                arguments_json: arguments.to_owned(),
            });
        }
    }

    let usage = json
        .get("usage")
        .map(|u| Usage {
            prompt_tokens: u.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0),
            completion_tokens: u
                .get("completion_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cache_read_tokens: u
                .pointer("/prompt_tokens_details/cached_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            cache_write_tokens: 0,
        })
        .unwrap_or_default();

    Ok(ChatOutcome {
        content,
        tool_calls,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_answer() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let out = parse_chat_response("test", &json).unwrap();
        assert_eq!(out.content, "hello");
        assert!(out.tool_calls.is_empty());
        assert_eq!(out.usage.prompt_tokens, 12);
        assert_eq!(out.usage.completion_tokens, 3);
    }

    #[test]
    fn parses_structured_tool_calls() {
        let json = serde_json::json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "memo_search", "arguments": "{\"query\":\"Python\"}"}
                }]
            }}]
        });
        let out = parse_chat_response("test", &json).unwrap();
        assert_eq!(out.content, "");
        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].name, "memo_search");
        assert_eq!(out.tool_calls[0].arguments_json, "{\"query\":\"Python\"}");
    }

    #[test]
    fn parses_cached_token_details() {
        let json = serde_json::json!({
            "choices": [{"message": {"content": "ok"}}],
            "usage": {
                "prompt_tokens": 100,
                "completion_tokens": 10,
                "prompt_tokens_details": {"cached_tokens": 60}
            }
        });
        let out = parse_chat_response("test", &json).unwrap();
        assert_eq!(out.usage.cache_read_tokens, 60);
    }

    #[test]
    fn missing_choices_is_provider_error() {
        let json = serde_json::json!({"error": "bad"});
        let err = parse_chat_response("test", &json).unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }

    #[test]
    fn status_error_taxonomy() {
        assert!(map_status_error("p", 401, "no key")
            .to_string()
            .contains("authentication failed"));
        assert!(map_status_error("p", 429, "slow down")
            .to_string()
            .contains("quota"));
        assert!(map_status_error("p", 400, "context_length_exceeded")
            .to_string()
            .contains("context length"));
        assert!(map_status_error("p", 500, "oops").to_string().contains("HTTP 500"));
    }

    #[test]
    fn chat_body_includes_tools_only_when_present() {
        let p = OpenAiCompatProvider::new(
            "t",
            "http://localhost/v1",
            "m",
            "e",
            None,
            Duration::from_secs(5),
            0,
        )
        .unwrap();

        let msgs = vec![Message::user("hi")];
        let body = p.build_chat_body(&msgs, &[]);
        assert!(body.get("tools").is_none());

        let tools = vec![ToolDescriptor {
            name: "memo_search".into(),
            description: "search memos".into(),
            parameters: serde_json::json!({"type": "object"}),
        }];
        let body = p.build_chat_body(&msgs, &tools);
        assert_eq!(body["tools"][0]["function"]["name"], "memo_search");
    }
}
