use serde::{Deserialize, Serialize};

/// Router thresholds and sticky-session windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Below this classification confidence the request is handed to the
    /// orchestrator.
    #[serde(default = "d_confidence_threshold")]
    pub confidence_threshold: f64,
    /// Inputs at most this many characters long qualify as short
    /// confirmations for sticky routing.
    #[serde(default = "d_short_confirmation")]
    pub short_confirmation_max_chars: usize,
    /// Metadata sticky window.
    #[serde(default = "d_sticky_window")]
    pub sticky_window_secs: u64,
    /// In-memory sticky requires at least this confidence on the previous
    /// route.
    #[serde(default = "d_memory_sticky_confidence")]
    pub memory_sticky_min_confidence: f64,
    /// Cosine similarity floor for the history classification layer.
    #[serde(default = "d_history_similarity")]
    pub history_min_similarity: f64,
    /// Bound on the classification result cache (LRU entries).
    #[serde(default = "d_cache_capacity")]
    pub cache_capacity: usize,
    /// Enables the metadata sticky layer (requires a conversation id).
    #[serde(default = "d_true")]
    pub metadata_sticky_enabled: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: d_confidence_threshold(),
            short_confirmation_max_chars: d_short_confirmation(),
            sticky_window_secs: d_sticky_window(),
            memory_sticky_min_confidence: d_memory_sticky_confidence(),
            history_min_similarity: d_history_similarity(),
            cache_capacity: d_cache_capacity(),
            metadata_sticky_enabled: d_true(),
        }
    }
}

fn d_confidence_threshold() -> f64 {
    0.7
}
fn d_short_confirmation() -> usize {
    10
}
fn d_sticky_window() -> u64 {
    300
}
fn d_memory_sticky_confidence() -> f64 {
    0.8
}
fn d_history_similarity() -> f64 {
    0.85
}
fn d_cache_capacity() -> usize {
    256
}
fn d_true() -> bool {
    true
}
