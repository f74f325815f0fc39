//! Per-conversation cancellation.
//!
//! Each running request registers a token keyed by conversation id.
//! Cancelling stops the agent loop at its next checkpoint and tears down
//! any CC session the run is blocked on (the token is select-able).

use parking_lot::Mutex;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct CancelMap {
    tokens: Mutex<HashMap<i64, CancellationToken>>,
}

impl CancelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a fresh token for a conversation's run.
    pub fn register(&self, conversation_id: i64) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().insert(conversation_id, token.clone());
        token
    }

    /// Cancel the running request, if any. Returns whether one was found.
    pub fn cancel(&self, conversation_id: i64) -> bool {
        match self.tokens.lock().get(&conversation_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the token when the run completes.
    pub fn remove(&self, conversation_id: i64) {
        self.tokens.lock().remove(&conversation_id);
    }

    pub fn is_running(&self, conversation_id: i64) -> bool {
        self.tokens.lock().contains_key(&conversation_id)
    }
}
