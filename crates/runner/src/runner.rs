//! The Execute path: resolve the session, feed it the prompt, stream
//! events back through the sensitive filter until the child signals the
//! turn is over.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use av_domain::block::Mode;
use av_domain::error::{Error, Result};
use av_domain::event::{EventMeta, EventType, EventWithMeta, SafeCallback};
use av_domain::filter::SensitiveFilter;
use av_domain::trace::TraceEvent;

use crate::manager::SessionManager;
use crate::session::{session_id_for, SessionState};
use crate::stream::{encode_user_turn, BiDirectionalStreamer, ChildUsage, Terminal};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execute config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-call configuration. The runner is mode-agnostic: mode only feeds
/// the session identity, and the working directory comes resolved from the
/// caller (geek = per-user workspace, evolution = source tree).
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
    pub user_id: i64,
    pub conversation_id: i64,
    pub mode: Mode,
    pub work_dir: std::path::PathBuf,
}

/// What one Execute produced.
#[derive(Debug, Default)]
pub struct ExecuteOutcome {
    /// Accumulated answer text (filtered).
    pub answer: String,
    pub usage: Option<ChildUsage>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runner
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CcRunner {
    manager: Arc<SessionManager>,
    filter: Arc<SensitiveFilter>,
}

enum StreamEnd {
    Completed(ExecuteOutcome),
    ChildGone,
    Cancelled,
    TimedOut,
}

impl CcRunner {
    pub fn new(manager: Arc<SessionManager>, filter: Arc<SensitiveFilter>) -> Self {
        Self { manager, filter }
    }

    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Run one prompt against the session for (user, conversation, mode).
    /// Blocks until the child finishes the turn; events stream through
    /// `callback` as they arrive.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        config: &ExecuteConfig,
        prompt: &str,
        callback: &SafeCallback,
    ) -> Result<ExecuteOutcome> {
        let session_id = session_id_for(config.user_id, config.conversation_id, config.mode);

        // A dead entry left by a previous failure is forgotten and the
        // session respawned, once.
        for attempt in 0..2 {
            let (session_arc, created) =
                self.manager.get_or_create(session_id, &config.work_dir)?;

            // Per-session mutex: a concurrent Execute for the same session
            // waits here, preserving in-order semantics per conversation.
            let mut session = session_arc.lock().await;

            if session.state == SessionState::Dead {
                drop(session);
                self.manager.forget(&session_id);
                if attempt == 0 {
                    continue;
                }
                return Err(Error::session(session_id.to_string(), "session dead"));
            }

            if !created {
                TraceEvent::SessionReused {
                    session_id: session_id.to_string(),
                    pid: session.pid,
                }
                .emit();
            }

            // Write the user turn as a single JSON line.
            let stdin = session.stdin.as_mut().ok_or_else(|| {
                Error::session(session_id.to_string(), "session stdin closed")
            })?;
            let line = format!("{}\n", encode_user_turn(prompt));
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                session.state = SessionState::Dead;
                drop(session);
                self.manager.forget(&session_id);
                return Err(Error::session(session_id.to_string(), format!("stdin write: {e}")));
            }
            let _ = stdin.flush().await;

            session.state = SessionState::Busy;

            let deadline =
                Duration::from_secs(self.manager.config().execute_timeout_secs.max(1));
            let end = self
                .stream_until_terminal(&mut session, &cancel, deadline, created, callback, &session_id)
                .await;

            return match end {
                StreamEnd::Completed(outcome) => {
                    session.state = SessionState::Ready;
                    session.touch();
                    Ok(outcome)
                }
                StreamEnd::ChildGone => {
                    session.state = SessionState::Dead;
                    drop(session);
                    // Tear down whatever is left of the process group; the
                    // next Execute respawns with --resume.
                    if self.manager.terminate_session(&session_id).await.is_err() {
                        self.manager.forget(&session_id);
                    }
                    Err(Error::session(session_id.to_string(), "stream ended unexpectedly"))
                }
                StreamEnd::Cancelled => {
                    drop(session);
                    if let Err(e) = self.manager.terminate_session(&session_id).await {
                        tracing::warn!(session_id = %session_id, error = %e, "terminate after cancel failed");
                    }
                    Err(Error::Cancelled)
                }
                StreamEnd::TimedOut => {
                    drop(session);
                    if let Err(e) = self.manager.terminate_session(&session_id).await {
                        tracing::warn!(session_id = %session_id, error = %e, "terminate after timeout failed");
                    }
                    Err(Error::Timeout(format!("cc execute for session {session_id}")))
                }
            };
        }
        unreachable!("respawn loop always returns")
    }

    /// Drain child lines until a terminal event, cancellation, or timeout.
    #[allow(clippy::too_many_arguments)]
    async fn stream_until_terminal(
        &self,
        session: &mut crate::session::CcSession,
        cancel: &CancellationToken,
        deadline: Duration,
        freshly_spawned: bool,
        callback: &SafeCallback,
        session_id: &Uuid,
    ) -> StreamEnd {
        let mut streamer = BiDirectionalStreamer::new();
        let mut answer = String::new();
        let started = tokio::time::Instant::now();
        // A freshly spawned child must start streaming within the spawn
        // window; warm sessions only answer to the execute deadline.
        let spawn_window =
            Duration::from_secs(self.manager.config().spawn_timeout_secs.max(1));
        let mut awaiting_first_line = freshly_spawned;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return StreamEnd::TimedOut;
            }
            let mut remaining = deadline - elapsed;
            if awaiting_first_line {
                let first_line_budget = spawn_window.saturating_sub(elapsed);
                if first_line_budget.is_zero() {
                    return StreamEnd::TimedOut;
                }
                remaining = remaining.min(first_line_budget);
            }

            let line = tokio::select! {
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                _ = tokio::time::sleep(remaining) => return StreamEnd::TimedOut,
                line = session.lines.recv() => line,
            };
            awaiting_first_line = false;

            let Some(line) = line else {
                // EOF mid-stream: surface an error event, mark dead upstream.
                callback.emit(&EventWithMeta::new(
                    EventType::Error,
                    "code execution session ended unexpectedly",
                ));
                return StreamEnd::ChildGone;
            };

            let mapped = streamer.map(line);

            if let Some(mut event) = mapped.event {
                event.content = self.filter.filter_text(&event.content);
                if event.event_type == EventType::Answer {
                    if !answer.is_empty() {
                        answer.push('\n');
                    }
                    answer.push_str(&event.content);
                }
                let is_error_event = event.event_type == EventType::Error;
                callback.emit(&event);
                if is_error_event && mapped.terminal == Terminal::Error {
                    return StreamEnd::ChildGone;
                }
            }

            match mapped.terminal {
                Terminal::Completed => {
                    if let Some(usage) = &mapped.usage {
                        callback.emit(&stats_event(session_id, usage));
                    }
                    return StreamEnd::Completed(ExecuteOutcome {
                        answer,
                        usage: mapped.usage,
                    });
                }
                Terminal::Error => return StreamEnd::ChildGone,
                Terminal::No => {}
            }
        }
    }
}

fn stats_event(session_id: &Uuid, usage: &ChildUsage) -> EventWithMeta {
    let content = serde_json::json!({
        "prompt_tokens": usage.prompt_tokens,
        "completion_tokens": usage.completion_tokens,
        "cache_read_tokens": usage.cache_read_tokens,
        "cache_write_tokens": usage.cache_write_tokens,
    })
    .to_string();
    EventWithMeta::new(EventType::SessionStats, content).with_meta(
        EventMeta::default().with_extra("session_id", serde_json::json!(session_id.to_string())),
    )
}
