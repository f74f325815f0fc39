//! The block data model: one round of AI interaction.
//!
//! A block accumulates user inputs, the event stream, the assistant's final
//! content, and session stats. Its status moves strictly forward:
//! pending → streaming → {completed, error}.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::EventWithMeta;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Interaction mode requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    /// Code-execution mode backed by a CC session in the user workspace.
    Geek,
    /// Self-modification mode; admin plus an env gate are required.
    Evolution,
    /// Let the router decide.
    Auto,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Geek => "geek",
            Mode::Evolution => "evolution",
            Mode::Auto => "auto",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Block lifecycle status. Transitions are strictly monotonic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Pending,
    Streaming,
    Completed,
    Error,
}

impl BlockStatus {
    fn rank(&self) -> u8 {
        match self {
            BlockStatus::Pending => 0,
            BlockStatus::Streaming => 1,
            BlockStatus::Completed => 2,
            BlockStatus::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    /// Same-state writes are allowed (idempotent updates); regressions and
    /// terminal-to-terminal flips are not.
    pub fn can_transition(&self, next: BlockStatus) -> bool {
        if *self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.rank() > self.rank()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockStatus::Completed | BlockStatus::Error)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stats
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Totals accumulated during one run. All counters are monotonic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStats {
    pub llm_call_count: u32,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub tool_call_count: u32,
}

impl AgentStats {
    /// Merge another stats record into this one (counter addition).
    pub fn merge(&mut self, other: &AgentStats) {
        self.llm_call_count += other.llm_call_count;
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.cache_read_tokens += other.cache_read_tokens;
        self.cache_write_tokens += other.cache_write_tokens;
        self.tool_call_count += other.tool_call_count;
    }

    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Block
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user turn appended to a block. A block may accumulate several when
/// a CC session consumes follow-up turns within the same round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInput {
    pub content: String,
    pub ts: DateTime<Utc>,
}

/// An event as persisted inside a block's stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEvent {
    #[serde(rename = "type")]
    pub event_type: crate::event::EventType,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    /// Epoch milliseconds; non-decreasing within a stream.
    pub ts: i64,
}

impl From<&EventWithMeta> for BlockEvent {
    fn from(ev: &EventWithMeta) -> Self {
        Self {
            event_type: ev.event_type,
            content: ev.content.clone(),
            meta: ev
                .meta
                .as_ref()
                .and_then(|m| serde_json::to_value(m).ok()),
            ts: ev.ts,
        }
    }
}

/// A single round of AI interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub conversation_id: i64,
    pub user_id: i64,
    /// Monotonic within a conversation; unique per conversation.
    pub round_number: u32,
    pub mode: Mode,
    pub user_inputs: Vec<UserInput>,
    pub assistant_content: String,
    pub event_stream: Vec<BlockEvent>,
    pub session_stats: AgentStats,
    pub status: BlockStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Block {
    pub fn new(
        conversation_id: i64,
        user_id: i64,
        round_number: u32,
        mode: Mode,
        initial_user_input: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id,
            user_id,
            round_number,
            mode,
            user_inputs: vec![UserInput {
                content: initial_user_input.to_owned(),
                ts: now,
            }],
            assistant_content: String::new(),
            event_stream: Vec::new(),
            session_stats: AgentStats::default(),
            status: BlockStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}
