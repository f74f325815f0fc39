//! Session identity and per-session state.
//!
//! A session id is a UUID v5 over `"{user_id}:{conversation_id}:{mode}"`,
//! so a retry or reconnect resolves to the same session, different modes
//! never collide, and the id is stable across processes.

use std::time::Instant;
use tokio::process::{Child, ChildStdin};
use tokio::sync::mpsc;
use uuid::Uuid;

use av_domain::block::Mode;

use crate::stream::ChildLine;

/// Fixed namespace for CC session ids. Changing it would orphan every
/// resumable session on disk.
pub const SESSION_NAMESPACE: Uuid = Uuid::from_u128(0x8f3c_1f6a_2b4d_4e5f_9a10_6c7d_8e9f_0a1b);

/// Deterministic session id for (user, conversation, mode).
pub fn session_id_for(user_id: i64, conversation_id: i64, mode: Mode) -> Uuid {
    let name = format!("{user_id}:{conversation_id}:{mode}");
    Uuid::new_v5(&SESSION_NAMESPACE, name.as_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    Busy,
    Terminating,
    Dead,
}

/// A live child process held by the runner. Callers never touch this
/// directly; they hold only the session id.
pub struct CcSession {
    pub session_id: Uuid,
    pub pid: u32,
    pub state: SessionState,
    pub last_activity: Instant,
    pub(crate) child: Child,
    pub(crate) stdin: Option<ChildStdin>,
    /// Parsed stdout lines from the reader task.
    pub(crate) lines: mpsc::Receiver<ChildLine>,
}

impl CcSession {
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_secs(&self) -> u64 {
        self.last_activity.elapsed().as_secs()
    }
}
