use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Block store and event persister settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Root for persisted state (block journals, route metadata).
    #[serde(default = "d_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "d_write_timeout")]
    pub write_timeout_secs: u64,
    /// Window for fingerprint deduplication of re-delivered events.
    #[serde(default = "d_dedup_window")]
    pub dedup_window_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            state_path: d_state_path(),
            write_timeout_secs: d_write_timeout(),
            dedup_window_secs: d_dedup_window(),
        }
    }
}

fn d_state_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aviary")
        .join("state")
}
fn d_write_timeout() -> u64 {
    5
}
fn d_dedup_window() -> u64 {
    5
}

/// Session-stats persister queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsConfig {
    /// Capped queue; enqueues beyond this are dropped with a warning.
    #[serde(default = "d_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "d_stats_write_timeout")]
    pub write_timeout_secs: u64,
    /// Identical session ids enqueued within this window are suppressed.
    #[serde(default = "d_stats_dedup_window")]
    pub dedup_window_secs: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            queue_capacity: d_queue_capacity(),
            write_timeout_secs: d_stats_write_timeout(),
            dedup_window_secs: d_stats_dedup_window(),
        }
    }
}

fn d_queue_capacity() -> usize {
    256
}
fn d_stats_write_timeout() -> u64 {
    5
}
fn d_stats_dedup_window() -> u64 {
    5
}
