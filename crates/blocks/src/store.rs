//! Block store: one record per AI round.
//!
//! The in-memory map is authoritative for a process lifetime; every
//! mutation is additionally journalled to `<state>/blocks/<id>.jsonl` as a
//! single JSON line, append-only. Writes to the same block are serialised
//! through a per-block lock so the event stream keeps emission order.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use av_domain::block::{Block, BlockEvent, BlockStatus, Mode, UserInput};
use av_domain::error::{Error, Result};
use av_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Journal lines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JournalLine<'a> {
    Created { block: &'a Block },
    Event { event: &'a BlockEvent },
    UserInput { content: &'a str, ts: i64 },
    AssistantContent { content: &'a str },
    Status { status: BlockStatus },
    Stats { stats: &'a av_domain::block::AgentStats },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct BlockStore {
    blocks: RwLock<HashMap<String, Block>>,
    /// round_number high-water mark per conversation.
    rounds: RwLock<HashMap<i64, u32>>,
    /// Per-block write serialisation.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    journal_dir: Option<PathBuf>,
}

impl BlockStore {
    /// A store journalling under `state_path/blocks`.
    pub fn new(state_path: &std::path::Path) -> Result<Self> {
        let dir = state_path.join("blocks");
        std::fs::create_dir_all(&dir).map_err(Error::Io)?;
        Ok(Self {
            blocks: RwLock::new(HashMap::new()),
            rounds: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            journal_dir: Some(dir),
        })
    }

    /// An in-memory store without a journal (tests, ephemeral runs).
    pub fn in_memory() -> Self {
        Self {
            blocks: RwLock::new(HashMap::new()),
            rounds: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            journal_dir: None,
        }
    }

    fn block_lock(&self, block_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(block_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Journal writes are best-effort: a failed append is logged and never
    /// blocks the user-facing path.
    fn journal(&self, block_id: &str, line: &JournalLine<'_>) {
        let Some(dir) = &self.journal_dir else {
            return;
        };
        let path = dir.join(format!("{block_id}.jsonl"));
        let result = (|| -> std::io::Result<()> {
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            let json = serde_json::to_string(line).map_err(std::io::Error::other)?;
            file.write_all(json.as_bytes())?;
            file.write_all(b"\n")
        })();
        if let Err(e) = result {
            tracing::warn!(block_id, error = %e, "block journal append failed");
        }
    }

    // ── creation ───────────────────────────────────────────────────

    /// Next free round number for a conversation (monotonic).
    pub fn next_round_number(&self, conversation_id: i64) -> u32 {
        self.rounds
            .read()
            .get(&conversation_id)
            .copied()
            .unwrap_or(0)
            + 1
    }

    /// Create a block in `pending` state. Round numbers must be unique and
    /// increasing per conversation.
    pub fn create_block(
        &self,
        conversation_id: i64,
        user_id: i64,
        mode: Mode,
        round_number: u32,
        initial_user_input: &str,
    ) -> Result<String> {
        {
            let mut rounds = self.rounds.write();
            let high = rounds.entry(conversation_id).or_insert(0);
            if round_number <= *high {
                return Err(Error::Validation(format!(
                    "round {round_number} already used for conversation {conversation_id}"
                )));
            }
            *high = round_number;
        }

        let block = Block::new(conversation_id, user_id, round_number, mode, initial_user_input);
        let block_id = block.id.clone();

        TraceEvent::BlockCreated {
            block_id: block_id.clone(),
            conversation_id,
            round_number,
            mode: mode.to_string(),
        }
        .emit();

        self.journal(&block_id, &JournalLine::Created { block: &block });
        self.blocks.write().insert(block_id.clone(), block);
        Ok(block_id)
    }

    // ── mutation ───────────────────────────────────────────────────

    /// Append one event. The first event moves a pending block to
    /// `streaming`. Event timestamps are clamped to be non-decreasing.
    pub fn append_event(&self, block_id: &str, mut event: BlockEvent) -> Result<()> {
        let lock = self.block_lock(block_id);
        let _guard = lock.lock();

        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(block_id)
            .ok_or_else(|| Error::Persistence(format!("unknown block: {block_id}")))?;

        if let Some(last) = block.event_stream.last() {
            if event.ts < last.ts {
                event.ts = last.ts;
            }
        }

        if block.status == BlockStatus::Pending {
            block.status = BlockStatus::Streaming;
            self.journal(
                block_id,
                &JournalLine::Status {
                    status: BlockStatus::Streaming,
                },
            );
        }

        self.journal(block_id, &JournalLine::Event { event: &event });
        block.event_stream.push(event);
        block.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Append a follow-up user turn (CC sessions consume several per block).
    pub fn append_user_input(&self, block_id: &str, content: &str) -> Result<()> {
        let lock = self.block_lock(block_id);
        let _guard = lock.lock();

        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(block_id)
            .ok_or_else(|| Error::Persistence(format!("unknown block: {block_id}")))?;
        let now = chrono::Utc::now();
        self.journal(
            block_id,
            &JournalLine::UserInput {
                content,
                ts: now.timestamp_millis(),
            },
        );
        block.user_inputs.push(UserInput {
            content: content.to_owned(),
            ts: now,
        });
        block.updated_at = now;
        Ok(())
    }

    pub fn update_assistant_content(&self, block_id: &str, content: &str) -> Result<()> {
        let lock = self.block_lock(block_id);
        let _guard = lock.lock();

        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(block_id)
            .ok_or_else(|| Error::Persistence(format!("unknown block: {block_id}")))?;
        self.journal(block_id, &JournalLine::AssistantContent { content });
        block.assistant_content = content.to_owned();
        block.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Merge run stats into the block's session stats.
    pub fn merge_stats(&self, block_id: &str, stats: &av_domain::block::AgentStats) -> Result<()> {
        let lock = self.block_lock(block_id);
        let _guard = lock.lock();

        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(block_id)
            .ok_or_else(|| Error::Persistence(format!("unknown block: {block_id}")))?;
        block.session_stats.merge(stats);
        self.journal(
            block_id,
            &JournalLine::Stats {
                stats: &block.session_stats,
            },
        );
        block.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Enforce the monotonic status machine; regressions are rejected.
    pub fn update_status(&self, block_id: &str, status: BlockStatus) -> Result<()> {
        let lock = self.block_lock(block_id);
        let _guard = lock.lock();

        let mut blocks = self.blocks.write();
        let block = blocks
            .get_mut(block_id)
            .ok_or_else(|| Error::Persistence(format!("unknown block: {block_id}")))?;

        if !block.status.can_transition(status) {
            return Err(Error::Validation(format!(
                "illegal block status transition {:?} -> {:?}",
                block.status, status
            )));
        }
        if block.status != status {
            TraceEvent::BlockStatusChanged {
                block_id: block_id.to_owned(),
                from: format!("{:?}", block.status),
                to: format!("{status:?}"),
            }
            .emit();
            self.journal(block_id, &JournalLine::Status { status });
            block.status = status;
            block.updated_at = chrono::Utc::now();
        }
        Ok(())
    }

    // ── queries ────────────────────────────────────────────────────

    pub fn get_block(&self, block_id: &str) -> Option<Block> {
        self.blocks.read().get(block_id).cloned()
    }

    /// List a conversation's blocks in round order, starting after
    /// `cursor` (a round number), at most `limit` entries.
    pub fn list_blocks(&self, conversation_id: i64, cursor: Option<u32>, limit: usize) -> Vec<Block> {
        let after = cursor.unwrap_or(0);
        let mut out: Vec<Block> = self
            .blocks
            .read()
            .values()
            .filter(|b| b.conversation_id == conversation_id && b.round_number > after)
            .cloned()
            .collect();
        out.sort_by_key(|b| b.round_number);
        out.truncate(limit);
        out
    }
}
