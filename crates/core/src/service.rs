//! The assistant facade: one call per user request.
//!
//! Serialises requests per conversation, routes, opens (or continues) a
//! block, executes the chosen parrot with a filtered callback chain, and
//! settles persistence and side effects. The live stream to the caller is
//! fail-fast; stats and memory are best-effort.

use chrono::Utc;
use std::sync::Arc;

use av_blocks::stats::StatsRecord;
use av_domain::block::{BlockStatus, Mode};
use av_domain::error::{Error, Result};
use av_domain::event::{EventCallback, EventType, EventWithMeta, SafeCallback};
use av_domain::message::Message;

use crate::parrot::{execute_parrot, ParrotRequest};
use crate::router::{RouteDecision, RouteFlags};
use crate::runtime::agent_loop::RunOutcome;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / result
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub user_id: i64,
    pub conversation_id: i64,
    pub input: String,
    pub mode: Mode,
    /// Explicit non-auto agent selection.
    pub requested_agent: Option<String>,
    pub is_admin: bool,
    /// Continue an existing (still streaming) block instead of opening a
    /// new one — used for follow-up turns into a live CC session.
    pub follow_up_block: Option<String>,
}

impl ChatRequest {
    pub fn new(user_id: i64, conversation_id: i64, input: impl Into<String>) -> Self {
        Self {
            user_id,
            conversation_id,
            input: input.into(),
            mode: Mode::Auto,
            requested_agent: None,
            is_admin: false,
            follow_up_block: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub block_id: String,
    pub route: RouteDecision,
    pub content: String,
    pub stats: av_domain::block::AgentStats,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assistant
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Assistant {
    state: AppState,
}

impl Assistant {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Handle one request end to end, streaming events to `live`.
    pub async fn handle(&self, req: ChatRequest, live: EventCallback) -> Result<ChatResult> {
        let state = &self.state;

        // Requests to the same conversation are serialised.
        let _permit = state.run_locks.acquire(req.conversation_id).await;

        let ctx = state
            .contexts
            .get_or_create(req.conversation_id, req.user_id);

        // ── Route ──────────────────────────────────────────────────
        let flags = RouteFlags {
            mode: req.mode,
            requested_agent: req.requested_agent.clone(),
            is_admin: req.is_admin,
        };
        let decision = state
            .router
            .route(&req.input, req.conversation_id, &ctx, &flags)
            .await?;

        // ── Block ──────────────────────────────────────────────────
        let block_id = self.resolve_block(&req)?;
        ctx.lock().push_turn(Message::user(&req.input));

        // ── Callback chain: filter → live → persist ────────────────
        let composed = state.persister.callback_for(block_id.clone(), live);
        let filter = state.filter.clone();
        let callback = SafeCallback::new(Arc::new(move |ev: &EventWithMeta| {
            let mut ev = ev.clone();
            ev.content = filter.filter_text(&ev.content);
            composed.emit(&ev);
            Ok(())
        }));

        let cancel = state.cancel_map.register(req.conversation_id);

        // ── Execute ────────────────────────────────────────────────
        let parrot = state.parrots.get(&decision.route).ok_or_else(|| {
            Error::Config(format!("routed to unknown parrot: {}", decision.route))
        })?;
        let parrot_req = ParrotRequest {
            user_id: req.user_id,
            conversation_id: req.conversation_id,
            input: req.input.clone(),
            is_admin: req.is_admin,
        };

        let executed = execute_parrot(
            &state.parrot_deps,
            &state.parrots,
            &parrot,
            &parrot_req,
            &callback,
            &cancel,
        )
        .await;

        state.cancel_map.remove(req.conversation_id);

        match executed {
            Ok(outcome) => {
                self.finish_success(&req, &ctx, &decision, &block_id, outcome)
                    .await
            }
            Err(e) => {
                // The terminal error event reaches the caller before the
                // durable status flip.
                callback.emit(&EventWithMeta::new(EventType::Error, e.to_string()));
                if let Err(persist_err) =
                    state.blocks.update_status(&block_id, BlockStatus::Error)
                {
                    tracing::warn!(block_id, error = %persist_err, "error status update failed");
                }
                Err(e)
            }
        }
    }

    async fn finish_success(
        &self,
        req: &ChatRequest,
        ctx: &Arc<parking_lot::Mutex<av_blocks::ConversationContext>>,
        decision: &RouteDecision,
        block_id: &str,
        outcome: RunOutcome,
    ) -> Result<ChatResult> {
        let state = &self.state;
        let content = state.filter.filter_text(&outcome.content);

        if let Err(e) = state.blocks.update_assistant_content(block_id, &content) {
            tracing::warn!(block_id, error = %e, "assistant content update failed");
        }
        if let Err(e) = state.blocks.merge_stats(block_id, &outcome.stats) {
            tracing::warn!(block_id, error = %e, "stats merge failed");
        }
        state.blocks.update_status(block_id, BlockStatus::Completed)?;

        // Side effects are best-effort and never block the response.
        state.stats.enqueue(StatsRecord {
            session_id: block_id.to_owned(),
            user_id: req.user_id,
            conversation_id: req.conversation_id,
            stats: outcome.stats.clone(),
            ts: Utc::now(),
        });
        {
            let mut ctx = ctx.lock();
            ctx.push_turn(Message::assistant(&content));
            ctx.bump_turn();
        }
        state.memory.generate(
            req.user_id,
            decision.route.clone(),
            req.input.clone(),
            content.clone(),
        );

        Ok(ChatResult {
            block_id: block_id.to_owned(),
            route: decision.clone(),
            content,
            stats: outcome.stats,
        })
    }

    /// Open a fresh block, or append to a still-streaming one when the
    /// caller asked to follow up (CC sessions accumulate user turns).
    fn resolve_block(&self, req: &ChatRequest) -> Result<String> {
        if let Some(follow_up) = &req.follow_up_block {
            if let Some(block) = self.state.blocks.get_block(follow_up) {
                if block.conversation_id == req.conversation_id
                    && block.mode == req.mode
                    && !block.status.is_terminal()
                {
                    self.state.blocks.append_user_input(follow_up, &req.input)?;
                    return Ok(follow_up.clone());
                }
            }
            tracing::debug!(
                block_id = %follow_up,
                "follow-up block unavailable, opening a new one"
            );
        }

        let round = self.state.blocks.next_round_number(req.conversation_id);
        self.state.blocks.create_block(
            req.conversation_id,
            req.user_id,
            req.mode,
            round,
            &req.input,
        )
    }

    /// Cancel the running request for a conversation, if any.
    pub fn cancel(&self, conversation_id: i64) -> bool {
        self.state.cancel_map.cancel(conversation_id)
    }

    /// Explicit conversation reset: clears sticky routing and context.
    pub fn reset_conversation(&self, conversation_id: i64) {
        self.state
            .router
            .reset_conversation(conversation_id, &self.state.contexts);
    }

    /// Graceful shutdown: drain stats (reporting saved/lost), stop the
    /// reaper, and group-kill every CC session.
    pub async fn close(&self) -> (usize, usize) {
        let drained = self.state.stats.close().await;
        self.state.reaper_cancel.cancel();
        self.state.runner.session_manager().terminate_all().await;
        drained
    }
}
