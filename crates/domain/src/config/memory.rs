use serde::{Deserialize, Serialize};

/// Episodic memory and summary generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Concurrent generation tasks (semaphore permits).
    #[serde(default = "d_concurrency")]
    pub concurrency: usize,
    #[serde(default = "d_task_timeout")]
    pub task_timeout_secs: u64,
    /// LLM summaries are asked to stay within this many words.
    #[serde(default = "d_summary_max_words")]
    pub summary_max_words: usize,
    /// Fallback when the LLM path fails: leading characters of the outcome.
    #[serde(default = "d_fallback_max_chars")]
    pub fallback_max_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            concurrency: d_concurrency(),
            task_timeout_secs: d_task_timeout(),
            summary_max_words: d_summary_max_words(),
            fallback_max_chars: d_fallback_max_chars(),
        }
    }
}

fn d_concurrency() -> usize {
    5
}
fn d_task_timeout() -> u64 {
    30
}
fn d_summary_max_words() -> usize {
    100
}
fn d_fallback_max_chars() -> usize {
    500
}
