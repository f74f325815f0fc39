//! Deterministic scripted provider for tests.
//!
//! Returns a fixed sequence of [`ChatOutcome`]s, records every request, and
//! produces deterministic character-frequency embeddings so similarity math
//! is testable without a live endpoint.

use av_domain::error::{Error, Result};
use av_domain::message::{Message, ToolDescriptor};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::traits::{ChatOutcome, ChatProvider};

pub struct ScriptedProvider {
    id: String,
    script: Mutex<VecDeque<ChatOutcome>>,
    chat_calls: AtomicU32,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedProvider {
    pub fn new(id: impl Into<String>, script: Vec<ChatOutcome>) -> Self {
        Self {
            id: id.into(),
            script: Mutex::new(script.into()),
            chat_calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a provider that always answers with fixed text.
    pub fn always(id: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let mut script = Vec::new();
        // Large enough for any bounded loop under test.
        for _ in 0..64 {
            script.push(ChatOutcome {
                content: content.clone(),
                ..Default::default()
            });
        }
        Self::new(id, script)
    }

    /// Number of chat calls made so far.
    pub fn chat_call_count(&self) -> u32 {
        self.chat_calls.load(Ordering::SeqCst)
    }

    /// Messages received by the n-th chat call.
    pub fn request_messages(&self, n: usize) -> Option<Vec<Message>> {
        self.requests.lock().get(n).cloned()
    }
}

#[async_trait::async_trait]
impl ChatProvider for ScriptedProvider {
    async fn chat_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDescriptor],
    ) -> Result<ChatOutcome> {
        self.chat_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(messages.to_vec());
        self.script
            .lock()
            .pop_front()
            .ok_or_else(|| Error::provider(self.id.as_str(), "script exhausted"))
    }

    async fn embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| crate::embed::char_frequency_vector(t))
            .collect())
    }

    fn provider_id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_script_in_order_then_errors() {
        let p = ScriptedProvider::new(
            "s",
            vec![
                ChatOutcome {
                    content: "one".into(),
                    ..Default::default()
                },
                ChatOutcome {
                    content: "two".into(),
                    ..Default::default()
                },
            ],
        );
        let msgs = vec![Message::user("hi")];
        assert_eq!(p.chat(&msgs).await.unwrap().content, "one");
        assert_eq!(p.chat(&msgs).await.unwrap().content, "two");
        assert!(p.chat(&msgs).await.is_err());
        assert_eq!(p.chat_call_count(), 3);
    }

    #[tokio::test]
    async fn records_requests() {
        let p = ScriptedProvider::always("s", "ok");
        p.chat(&[Message::system("sys"), Message::user("q")])
            .await
            .unwrap();
        let msgs = p.request_messages(0).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].content, "q");
    }

    #[tokio::test]
    async fn embeddings_are_deterministic() {
        let p = ScriptedProvider::always("s", "ok");
        let a = p.embeddings(&["继续".into()]).await.unwrap();
        let b = p.embeddings(&["继续".into()]).await.unwrap();
        assert_eq!(a, b);
    }
}
