//! The typed event envelope streamed to callers and persisted into blocks.
//!
//! Every observable step of a run (model thinking, tool dispatch, final
//! answer, errors) is an [`EventWithMeta`]. The set of event types is
//! closed: consumers switch on it exhaustively.

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed set of event types on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Thinking,
    ToolUse,
    ToolResult,
    Answer,
    Status,
    PhaseChange,
    Progress,
    SessionStats,
    DangerBlock,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Thinking => "thinking",
            EventType::ToolUse => "tool_use",
            EventType::ToolResult => "tool_result",
            EventType::Answer => "answer",
            EventType::Status => "status",
            EventType::PhaseChange => "phase_change",
            EventType::Progress => "progress",
            EventType::SessionStats => "session_stats",
            EventType::DangerBlock => "danger_block",
            EventType::Error => "error",
        }
    }

    /// Terminal events end a run: exactly one of `answer` (final) or
    /// `error` terminates.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventType::Answer | EventType::Error)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event meta
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Execution status carried in tool events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Success,
    Error,
}

/// Structured metadata attached to an event.
///
/// `occurrence` is a per-tool-name monotonic counter the UI uses to
/// deduplicate repeat calls without unique ids.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurrence: Option<u32>,
    /// Free-form extras (routing method, cache markers, session ids).
    /// An empty map flattens to nothing on the wire.
    #[serde(flatten, default)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl EventMeta {
    pub fn for_tool(name: impl Into<String>, status: EventStatus) -> Self {
        Self {
            tool_name: Some(name.into()),
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One event on the wire: `{ "type", "content", "meta", "ts" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventWithMeta {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
    /// Epoch milliseconds.
    pub ts: i64,
}

impl EventWithMeta {
    pub fn new(event_type: EventType, content: impl Into<String>) -> Self {
        Self {
            event_type,
            content: content.into(),
            meta: None,
            ts: Utc::now().timestamp_millis(),
        }
    }

    pub fn with_meta(mut self, meta: EventMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Callback
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Synchronous event sink. Implementations must be cheap; anything slow
/// (durable writes) belongs behind a queue.
pub type EventCallback = Arc<dyn Fn(&EventWithMeta) -> Result<()> + Send + Sync>;

/// Wraps a callback so that sink failures are logged instead of aborting
/// the run. The user-facing chain is fail-fast; the sink is not.
#[derive(Clone)]
pub struct SafeCallback {
    inner: EventCallback,
}

impl SafeCallback {
    pub fn new(inner: EventCallback) -> Self {
        Self { inner }
    }

    /// A callback that drops every event. Useful for fire-and-forget runs.
    pub fn noop() -> Self {
        Self {
            inner: Arc::new(|_| Ok(())),
        }
    }

    pub fn emit(&self, event: &EventWithMeta) {
        if let Err(e) = (self.inner)(event) {
            tracing::warn!(
                event_type = %event.event_type,
                error = %e,
                "event callback failed; event dropped from live stream"
            );
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Occurrence counter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Issues per-tool-name monotonic occurrence numbers within one run.
#[derive(Default)]
pub struct OccurrenceCounter {
    counts: Mutex<HashMap<String, u32>>,
}

impl OccurrenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next occurrence for `tool_name`, starting at 1.
    pub fn next(&self, tool_name: &str) -> u32 {
        let mut counts = self.counts.lock();
        let n = counts.entry(tool_name.to_owned()).or_insert(0);
        *n += 1;
        *n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn event_type_wire_names() {
        assert_eq!(EventType::ToolUse.as_str(), "tool_use");
        assert_eq!(EventType::PhaseChange.as_str(), "phase_change");
        let json = serde_json::to_string(&EventType::DangerBlock).unwrap();
        assert_eq!(json, "\"danger_block\"");
    }

    #[test]
    fn terminal_events() {
        assert!(EventType::Answer.is_terminal());
        assert!(EventType::Error.is_terminal());
        assert!(!EventType::Thinking.is_terminal());
        assert!(!EventType::ToolResult.is_terminal());
    }

    #[test]
    fn envelope_serializes_with_type_key() {
        let ev = EventWithMeta::new(EventType::Answer, "done");
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["content"], "done");
        assert!(json["ts"].as_i64().unwrap() > 0);
        // meta is omitted when absent.
        assert!(json.get("meta").is_none());
    }

    #[test]
    fn meta_extra_flattens() {
        let meta = EventMeta::default().with_extra("method", serde_json::json!("cache"));
        let ev = EventWithMeta::new(EventType::Status, "hit").with_meta(meta);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["meta"]["method"], "cache");
    }

    #[test]
    fn safe_callback_swallows_errors() {
        static CALLS: AtomicUsize = AtomicUsize::new(0);
        let cb = SafeCallback::new(Arc::new(|_| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            Err(crate::Error::Persistence("sink down".into()))
        }));
        // Must not panic or propagate.
        cb.emit(&EventWithMeta::new(EventType::Status, "x"));
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn occurrence_counter_is_per_tool_name() {
        let counter = OccurrenceCounter::new();
        assert_eq!(counter.next("memo_search"), 1);
        assert_eq!(counter.next("memo_search"), 2);
        assert_eq!(counter.next("schedule_add"), 1);
        assert_eq!(counter.next("memo_search"), 3);
    }
}
