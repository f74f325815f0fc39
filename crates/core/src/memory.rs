//! Episodic memory generation.
//!
//! After a block completes, a background task summarises the exchange,
//! embeds the summary, and stores it. Generation is bounded by a semaphore
//! and a per-task timeout; failures are logged and never reach the user.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use av_domain::config::MemoryConfig;
use av_domain::error::{Error, Result};
use av_domain::message::Message;
use av_domain::trace::TraceEvent;
use av_providers::ProviderRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The fixed importance for generated memories. Salience rating is a
/// possible refinement; the contract is a single float field.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpisodicMemory {
    pub user_id: i64,
    pub agent_type: String,
    /// Truncated copy of what the user asked.
    pub user_input: String,
    pub summary: String,
    /// `llm` or one of the fallback labels.
    pub summary_source: String,
    pub embedding: Vec<f32>,
    pub importance: f64,
    pub ts: DateTime<Utc>,
}

/// Where memories go. The vector store is an external collaborator.
#[async_trait::async_trait]
pub trait MemoryStore: Send + Sync {
    async fn store(&self, memory: EpisodicMemory) -> Result<()>;
}

/// Appends memories to `<state>/memories.jsonl`.
pub struct JsonlMemoryStore {
    path: std::path::PathBuf,
}

impl JsonlMemoryStore {
    pub fn new(state_path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        Ok(Self {
            path: state_path.join("memories.jsonl"),
        })
    }
}

#[async_trait::async_trait]
impl MemoryStore for JsonlMemoryStore {
    async fn store(&self, memory: EpisodicMemory) -> Result<()> {
        let line = serde_json::to_string(&memory)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(Error::Io)?;
            file.write_all(line.as_bytes()).map_err(Error::Io)?;
            file.write_all(b"\n").map_err(Error::Io)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Persistence(format!("memory write task: {e}")))?
    }
}

/// In-memory store for tests.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    pub memories: Mutex<Vec<EpisodicMemory>>,
}

#[async_trait::async_trait]
impl MemoryStore for InMemoryMemoryStore {
    async fn store(&self, memory: EpisodicMemory) -> Result<()> {
        self.memories.lock().push(memory);
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Summary fallbacks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Fallback chain when the LLM summary fails: first paragraph → first
/// sentence → rune-safe truncation, whichever first fits the budget.
pub fn fallback_summary(outcome: &str, budget_chars: usize) -> (String, &'static str) {
    let trimmed = outcome.trim();

    if let Some(paragraph) = trimmed.split("\n\n").next() {
        let paragraph = paragraph.trim();
        if !paragraph.is_empty() && paragraph.chars().count() <= budget_chars {
            return (paragraph.to_owned(), "fallback_first_para");
        }
    }

    if let Some(sentence) = first_sentence(trimmed) {
        if sentence.chars().count() <= budget_chars {
            return (sentence, "fallback_first_sentence");
        }
    }

    let truncated: String = trimmed.chars().take(budget_chars).collect();
    (truncated, "fallback_truncate")
}

fn first_sentence(text: &str) -> Option<String> {
    const ENDERS: &[char] = &['。', '！', '？', '.', '!', '?'];
    let end = text.find(ENDERS)?;
    // Include the ender itself (char boundary safe: find returns its start).
    let ender_len = text[end..].chars().next().map(|c| c.len_utf8()).unwrap_or(0);
    Some(text[..end + ender_len].trim().to_owned())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct MemoryGenerator {
    providers: Arc<ProviderRegistry>,
    store: Arc<dyn MemoryStore>,
    config: MemoryConfig,
    semaphore: Arc<Semaphore>,
}

impl MemoryGenerator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        store: Arc<dyn MemoryStore>,
        config: MemoryConfig,
    ) -> Arc<Self> {
        let semaphore = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Arc::new(Self {
            providers,
            store,
            config,
            semaphore,
        })
    }

    /// Fire-and-forget generation for one completed block.
    pub fn generate(
        self: &Arc<Self>,
        user_id: i64,
        agent_type: String,
        user_input: String,
        outcome: String,
    ) -> tokio::task::JoinHandle<()> {
        let generator = self.clone();
        tokio::spawn(async move {
            let _permit = match generator.semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let timeout = Duration::from_secs(generator.config.task_timeout_secs);
            match tokio::time::timeout(
                timeout,
                generator.generate_one(user_id, &agent_type, &user_input, &outcome),
            )
            .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(user_id, error = %e, "memory generation failed");
                }
                Err(_) => {
                    tracing::warn!(user_id, "memory generation timed out");
                }
            }
        })
    }

    async fn generate_one(
        &self,
        user_id: i64,
        agent_type: &str,
        user_input: &str,
        outcome: &str,
    ) -> Result<()> {
        let (summary, source) = self.summarize(user_input, outcome).await;

        let embedding = match self.providers.for_role("embedding") {
            Some(provider) => match provider.embeddings(&[summary.clone()]).await {
                Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
                Ok(_) | Err(_) => {
                    tracing::debug!("embedding failed, storing memory without vector");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let memory = EpisodicMemory {
            user_id,
            agent_type: agent_type.to_owned(),
            user_input: user_input.chars().take(200).collect(),
            summary,
            summary_source: source.to_owned(),
            embedding,
            importance: DEFAULT_IMPORTANCE,
            ts: Utc::now(),
        };

        self.store.store(memory).await?;
        TraceEvent::MemoryStored {
            user_id,
            agent_type: agent_type.to_owned(),
            summary_source: source.to_owned(),
        }
        .emit();
        Ok(())
    }

    async fn summarize(&self, user_input: &str, outcome: &str) -> (String, &'static str) {
        let provider = match self.providers.for_role("summary") {
            Some(provider) => provider,
            None => return fallback_summary(outcome, self.config.fallback_max_chars),
        };

        let prompt = format!(
            "用不超过 {} 个词总结这次交互，只输出总结本身。\n用户: {}\n结果: {}",
            self.config.summary_max_words, user_input, outcome
        );
        let messages = vec![
            Message::system("You write terse interaction summaries."),
            Message::user(prompt),
        ];

        match provider.chat(&messages).await {
            Ok(response) if !response.content.trim().is_empty() => {
                (response.content.trim().to_owned(), "llm")
            }
            Ok(_) => fallback_summary(outcome, self.config.fallback_max_chars),
            Err(e) => {
                tracing::debug!(error = %e, "llm summary failed, falling back");
                fallback_summary(outcome, self.config.fallback_max_chars)
            }
        }
    }
}
