//! Event persister: bridges live callback events into the block store.
//!
//! The live stream to the caller is flushed first; the durable append
//! happens after and never fails the run. A short fingerprint window drops
//! duplicates caused by retry or at-least-once delivery upstream.

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use av_domain::block::BlockEvent;
use av_domain::event::{EventCallback, EventWithMeta, SafeCallback};

use crate::store::BlockStore;

pub struct EventPersister {
    store: Arc<BlockStore>,
    dedup_window: Duration,
    seen: Mutex<HashMap<String, Instant>>,
}

impl EventPersister {
    pub fn new(store: Arc<BlockStore>, dedup_window: Duration) -> Self {
        Self {
            store,
            dedup_window,
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Persist one event into its block, unless it is a duplicate within
    /// the dedup window. Persistence failures are logged, not propagated.
    pub fn persist(&self, block_id: &str, event: &EventWithMeta) {
        let fp = fingerprint(block_id, event);
        if self.is_duplicate(&fp) {
            tracing::debug!(block_id, fingerprint = %fp, "duplicate event dropped");
            return;
        }
        if let Err(e) = self.store.append_event(block_id, BlockEvent::from(event)) {
            tracing::warn!(block_id, error = %e, "event persistence failed");
        }
    }

    /// Compose the full sink for one block: live forward first, durable
    /// append second. Sink failures never abort the run.
    pub fn callback_for(self: &Arc<Self>, block_id: String, live: EventCallback) -> SafeCallback {
        let persister = self.clone();
        SafeCallback::new(Arc::new(move |event: &EventWithMeta| {
            // Live stream is flushed before durable persistence finishes.
            let live_result = live(event);
            persister.persist(&block_id, event);
            live_result
        }))
    }

    fn is_duplicate(&self, fp: &str) -> bool {
        let now = Instant::now();
        let mut seen = self.seen.lock();
        seen.retain(|_, at| now.duration_since(*at) < self.dedup_window);
        if seen.contains_key(fp) {
            return true;
        }
        seen.insert(fp.to_owned(), now);
        false
    }
}

fn fingerprint(block_id: &str, event: &EventWithMeta) -> String {
    let mut hasher = Sha256::new();
    hasher.update(block_id.as_bytes());
    hasher.update([0]);
    hasher.update(event.event_type.as_str().as_bytes());
    hasher.update([0]);
    hasher.update(event.content.as_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_domain::block::Mode;
    use av_domain::event::EventType;

    fn setup() -> (Arc<BlockStore>, Arc<EventPersister>, String) {
        let store = Arc::new(BlockStore::in_memory());
        let block_id = store
            .create_block(100, 1, Mode::Normal, 1, "hi")
            .unwrap();
        let persister = Arc::new(EventPersister::new(
            store.clone(),
            Duration::from_secs(5),
        ));
        (store, persister, block_id)
    }

    #[test]
    fn persists_events_in_order() {
        let (store, persister, block_id) = setup();
        persister.persist(&block_id, &EventWithMeta::new(EventType::Thinking, "a"));
        persister.persist(&block_id, &EventWithMeta::new(EventType::Answer, "b"));
        let block = store.get_block(&block_id).unwrap();
        assert_eq!(block.event_stream.len(), 2);
        assert_eq!(block.event_stream[0].event_type, EventType::Thinking);
        assert_eq!(block.event_stream[1].event_type, EventType::Answer);
    }

    #[test]
    fn duplicate_within_window_dropped() {
        let (store, persister, block_id) = setup();
        let ev = EventWithMeta::new(EventType::Answer, "same");
        persister.persist(&block_id, &ev);
        persister.persist(&block_id, &ev);
        assert_eq!(store.get_block(&block_id).unwrap().event_stream.len(), 1);
    }

    #[test]
    fn duplicate_after_window_accepted() {
        let store = Arc::new(BlockStore::in_memory());
        let block_id = store.create_block(100, 1, Mode::Normal, 1, "hi").unwrap();
        let persister = EventPersister::new(store.clone(), Duration::from_millis(0));
        let ev = EventWithMeta::new(EventType::Answer, "same");
        persister.persist(&block_id, &ev);
        persister.persist(&block_id, &ev);
        assert_eq!(store.get_block(&block_id).unwrap().event_stream.len(), 2);
    }

    #[test]
    fn different_blocks_do_not_dedup_against_each_other() {
        let store = Arc::new(BlockStore::in_memory());
        let b1 = store.create_block(100, 1, Mode::Normal, 1, "hi").unwrap();
        let b2 = store.create_block(100, 1, Mode::Normal, 2, "hi").unwrap();
        let persister = EventPersister::new(store.clone(), Duration::from_secs(5));
        let ev = EventWithMeta::new(EventType::Answer, "same");
        persister.persist(&b1, &ev);
        persister.persist(&b2, &ev);
        assert_eq!(store.get_block(&b1).unwrap().event_stream.len(), 1);
        assert_eq!(store.get_block(&b2).unwrap().event_stream.len(), 1);
    }

    #[test]
    fn composed_callback_forwards_then_persists() {
        let (store, persister, block_id) = setup();
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let fw = forwarded.clone();
        let live: EventCallback = Arc::new(move |ev| {
            fw.lock().push(ev.content.clone());
            Ok(())
        });
        let cb = persister.callback_for(block_id.clone(), live);
        cb.emit(&EventWithMeta::new(EventType::Answer, "done"));

        assert_eq!(forwarded.lock().as_slice(), ["done"]);
        assert_eq!(store.get_block(&block_id).unwrap().event_stream.len(), 1);
    }
}
