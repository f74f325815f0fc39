//! In-memory conversation contexts.
//!
//! One context per conversation: a bounded window of recent turns, the
//! last routing decision, and keyed extension state (e.g. a schedule
//! draft). Contexts are created lazily, owned by one request at a time
//! (see [`RunLockMap`]), and evicted after an idle TTL.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use av_domain::message::Message;

/// Bounded turn window kept per conversation.
pub const MAX_RECENT_TURNS: usize = 20;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationContext
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug)]
pub struct ConversationContext {
    pub conversation_id: i64,
    pub user_id: i64,
    turns: VecDeque<Message>,
    pub last_agent: Option<String>,
    pub last_intent: Option<String>,
    pub last_intent_confidence: f64,
    /// Turns completed since the last routing decision; in-memory sticky
    /// applies only when exactly one has elapsed.
    pub turns_since_route: u32,
    /// Recent inputs labelled with the route they ended up on, for the
    /// router's history layer.
    labelled_inputs: VecDeque<(String, String)>,
    pub extensions: HashMap<String, serde_json::Value>,
    last_active: Instant,
}

impl ConversationContext {
    fn new(conversation_id: i64, user_id: i64) -> Self {
        Self {
            conversation_id,
            user_id,
            turns: VecDeque::new(),
            last_agent: None,
            last_intent: None,
            last_intent_confidence: 0.0,
            turns_since_route: 0,
            labelled_inputs: VecDeque::new(),
            extensions: HashMap::new(),
            last_active: Instant::now(),
        }
    }

    pub fn push_turn(&mut self, message: Message) {
        if self.turns.len() >= MAX_RECENT_TURNS {
            self.turns.pop_front();
        }
        self.turns.push_back(message);
        self.last_active = Instant::now();
    }

    pub fn recent_turns(&self) -> impl Iterator<Item = &Message> {
        self.turns.iter()
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Record a routing decision.
    pub fn record_route(&mut self, agent: &str, intent: &str, confidence: f64) {
        self.last_agent = Some(agent.to_owned());
        self.last_intent = Some(intent.to_owned());
        self.last_intent_confidence = confidence;
        self.turns_since_route = 0;
        self.last_active = Instant::now();
    }

    /// Remember an input together with the route it resolved to.
    pub fn push_labelled_input(&mut self, input: &str, route: &str) {
        if self.labelled_inputs.len() >= MAX_RECENT_TURNS {
            self.labelled_inputs.pop_front();
        }
        self.labelled_inputs
            .push_back((input.to_owned(), route.to_owned()));
    }

    pub fn labelled_inputs(&self) -> impl Iterator<Item = &(String, String)> {
        self.labelled_inputs.iter()
    }

    /// Mark one turn elapsed (called when a block completes).
    pub fn bump_turn(&mut self) {
        self.turns_since_route = self.turns_since_route.saturating_add(1);
        self.last_active = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ContextRegistry {
    contexts: Mutex<HashMap<i64, Arc<Mutex<ConversationContext>>>>,
}

impl ContextRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or lazily create the context for a conversation.
    pub fn get_or_create(&self, conversation_id: i64, user_id: i64) -> Arc<Mutex<ConversationContext>> {
        self.contexts
            .lock()
            .entry(conversation_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConversationContext::new(conversation_id, user_id)))
            })
            .clone()
    }

    pub fn get(&self, conversation_id: i64) -> Option<Arc<Mutex<ConversationContext>>> {
        self.contexts.lock().get(&conversation_id).cloned()
    }

    /// Drop the context entirely (explicit conversation reset).
    pub fn remove(&self, conversation_id: i64) {
        self.contexts.lock().remove(&conversation_id);
    }

    /// Evict contexts idle longer than `ttl`. Returns how many were dropped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let mut contexts = self.contexts.lock();
        let before = contexts.len();
        contexts.retain(|_, ctx| ctx.lock().idle_for() < ttl);
        before - contexts.len()
    }

    pub fn len(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Per-conversation run lock
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialises requests targeting the same conversation: a second request
/// waits for the first to finish. Each conversation maps to a
/// `Semaphore(1)`; the permit auto-releases on drop.
#[derive(Default)]
pub struct RunLockMap {
    locks: Mutex<HashMap<i64, Arc<Semaphore>>>,
}

impl RunLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, conversation_id: i64) -> OwnedSemaphorePermit {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(conversation_id)
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned().await.expect("run lock semaphore closed")
    }

    /// Drop locks that are not currently held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
