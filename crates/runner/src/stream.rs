//! Bidirectional JSONL stream mapping.
//!
//! The child writes line-delimited JSON objects describing `thinking`,
//! `tool_use`, `tool_result`, `answer`, `status`, and `error` steps, plus a
//! terminal `result` line. This module decodes those lines into canonical
//! [`EventWithMeta`] envelopes, attaching per-tool occurrence numbers and
//! durations. Malformed lines are skipped, never fatal.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;

use av_domain::event::{EventMeta, EventStatus, EventType, EventWithMeta, OccurrenceCounter};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One decoded stdout line from the child.
#[derive(Debug, Clone, Deserialize)]
pub struct ChildLine {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
    /// Tool name for tool_use / tool_result lines.
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub tool_id: Option<String>,
    #[serde(default)]
    pub input_summary: Option<String>,
    #[serde(default)]
    pub output_summary: Option<String>,
    #[serde(default)]
    pub is_error: bool,
    /// Token usage carried on the terminal result line.
    #[serde(default)]
    pub usage: Option<ChildUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChildUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_write_tokens: u64,
}

/// Decode one stdout line. `None` means skip (blank or malformed).
pub fn decode_line(line: &str) -> Option<ChildLine> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<ChildLine>(trimmed) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            tracing::debug!(error = %e, line = %truncate(trimmed, 120), "skipping malformed child line");
            None
        }
    }
}

/// The single JSON line written to the child's stdin for one user turn.
pub fn encode_user_turn(prompt: &str) -> String {
    serde_json::json!({
        "type": "user",
        "message": { "role": "user", "content": prompt },
    })
    .to_string()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a mapped line affects the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    No,
    /// The child finished the turn (answer-complete).
    Completed,
    Error,
}

#[derive(Debug)]
pub struct MappedLine {
    pub event: Option<EventWithMeta>,
    pub terminal: Terminal,
    pub usage: Option<ChildUsage>,
}

/// Stateful mapper for one session stream: tracks tool occurrences and
/// start times across an entire child lifetime.
pub struct BiDirectionalStreamer {
    occurrences: OccurrenceCounter,
    tool_started: HashMap<String, Instant>,
}

impl Default for BiDirectionalStreamer {
    fn default() -> Self {
        Self::new()
    }
}

impl BiDirectionalStreamer {
    pub fn new() -> Self {
        Self {
            occurrences: OccurrenceCounter::new(),
            tool_started: HashMap::new(),
        }
    }

    /// Map one decoded child line to a canonical event.
    pub fn map(&mut self, line: ChildLine) -> MappedLine {
        match line.kind.as_str() {
            "thinking" => MappedLine {
                event: Some(EventWithMeta::new(EventType::Thinking, line.content)),
                terminal: Terminal::No,
                usage: None,
            },
            "tool_use" => {
                let tool = line.tool.unwrap_or_else(|| "unknown".into());
                let key = line.tool_id.clone().unwrap_or_else(|| tool.clone());
                self.tool_started.insert(key, Instant::now());
                let mut meta = EventMeta::for_tool(tool.clone(), EventStatus::Running);
                meta.tool_id = line.tool_id;
                meta.input_summary = line.input_summary;
                meta.occurrence = Some(self.occurrences.next(&tool));
                MappedLine {
                    event: Some(EventWithMeta::new(EventType::ToolUse, line.content).with_meta(meta)),
                    terminal: Terminal::No,
                    usage: None,
                }
            }
            "tool_result" => {
                let tool = line.tool.unwrap_or_else(|| "unknown".into());
                let key = line.tool_id.clone().unwrap_or_else(|| tool.clone());
                let duration_ms = self
                    .tool_started
                    .remove(&key)
                    .map(|started| started.elapsed().as_millis() as u64);
                let status = if line.is_error {
                    EventStatus::Error
                } else {
                    EventStatus::Success
                };
                let mut meta = EventMeta::for_tool(tool, status);
                meta.tool_id = line.tool_id;
                meta.output_summary = line.output_summary;
                meta.duration_ms = duration_ms;
                MappedLine {
                    event: Some(
                        EventWithMeta::new(EventType::ToolResult, line.content).with_meta(meta),
                    ),
                    terminal: Terminal::No,
                    usage: None,
                }
            }
            "answer" => MappedLine {
                event: Some(EventWithMeta::new(EventType::Answer, line.content)),
                terminal: Terminal::No,
                usage: None,
            },
            "status" => MappedLine {
                event: Some(EventWithMeta::new(EventType::Status, line.content)),
                terminal: Terminal::No,
                usage: None,
            },
            // The child flags a step it refused on safety grounds.
            "danger_block" => MappedLine {
                event: Some(EventWithMeta::new(EventType::DangerBlock, line.content)),
                terminal: Terminal::No,
                usage: None,
            },
            // Terminal: the child finished this turn.
            "result" => MappedLine {
                event: None,
                terminal: Terminal::Completed,
                usage: line.usage,
            },
            "error" => MappedLine {
                event: Some(EventWithMeta::new(EventType::Error, line.content)),
                terminal: Terminal::Error,
                usage: None,
            },
            other => {
                tracing::debug!(kind = other, "ignoring unknown child line kind");
                MappedLine {
                    event: None,
                    terminal: Terminal::No,
                    usage: None,
                }
            }
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    let mut end = max.min(s.len());
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
