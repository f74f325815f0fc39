//! Asynchronous session-stats persister.
//!
//! Producers enqueue without blocking; a single worker drains the queue and
//! writes each record with a per-write timeout. When the queue is full the
//! record is dropped with a warning. Closing stops intake, drains what is
//! left, and reports (saved, lost).

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use av_domain::block::AgentStats;
use av_domain::config::StatsConfig;
use av_domain::error::{Error, Result};
use av_domain::trace::TraceEvent;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record and sink
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsRecord {
    /// Identifies the run whose stats these are (block id or CC session id).
    pub session_id: String,
    pub user_id: i64,
    pub conversation_id: i64,
    pub stats: AgentStats,
    pub ts: DateTime<Utc>,
}

/// Where drained records go. The durable layer is external; tests inject
/// their own sink.
#[async_trait::async_trait]
pub trait StatsSink: Send + Sync {
    async fn write(&self, record: &StatsRecord) -> Result<()>;
}

/// Appends records to `<state>/stats.jsonl`.
pub struct JsonlStatsSink {
    path: std::path::PathBuf,
}

impl JsonlStatsSink {
    pub fn new(state_path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        Ok(Self {
            path: state_path.join("stats.jsonl"),
        })
    }
}

#[async_trait::async_trait]
impl StatsSink for JsonlStatsSink {
    async fn write(&self, record: &StatsRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(Error::Io)?;
            file.write_all(line.as_bytes()).map_err(Error::Io)?;
            file.write_all(b"\n").map_err(Error::Io)?;
            Ok(())
        })
        .await
        .map_err(|e| Error::Persistence(format!("stats write task: {e}")))?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persister
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct StatsPersister {
    tx: Mutex<Option<mpsc::Sender<StatsRecord>>>,
    worker: Mutex<Option<tokio::task::JoinHandle<(usize, usize)>>>,
    dropped: Arc<AtomicUsize>,
    dedup: Mutex<HashMap<String, Instant>>,
    dedup_window: Duration,
}

impl StatsPersister {
    /// Spawn the drain worker. Must run inside a tokio runtime.
    pub fn spawn(config: &StatsConfig, sink: Arc<dyn StatsSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<StatsRecord>(config.queue_capacity);
        let write_timeout = Duration::from_secs(config.write_timeout_secs);

        let worker = tokio::spawn(async move {
            let mut saved = 0usize;
            let mut lost = 0usize;
            while let Some(record) = rx.recv().await {
                match tokio::time::timeout(write_timeout, sink.write(&record)).await {
                    Ok(Ok(())) => saved += 1,
                    Ok(Err(e)) => {
                        lost += 1;
                        tracing::warn!(
                            session_id = %record.session_id,
                            error = %e,
                            "stats write failed"
                        );
                    }
                    Err(_) => {
                        lost += 1;
                        tracing::warn!(
                            session_id = %record.session_id,
                            timeout_secs = write_timeout.as_secs(),
                            "stats write timed out"
                        );
                    }
                }
            }
            (saved, lost)
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            dropped: Arc::new(AtomicUsize::new(0)),
            dedup: Mutex::new(HashMap::new()),
            dedup_window: Duration::from_secs(config.dedup_window_secs),
        }
    }

    /// Non-blocking enqueue. Returns `true` when the record was accepted.
    /// Full queue, closed persister, and in-window duplicates all drop the
    /// record (duplicates silently, the rest with a warning).
    pub fn enqueue(&self, record: StatsRecord) -> bool {
        if self.is_duplicate(&record.session_id) {
            tracing::debug!(session_id = %record.session_id, "duplicate stats suppressed");
            return false;
        }

        let tx = self.tx.lock();
        let Some(tx) = tx.as_ref() else {
            self.count_drop(&record.session_id, "closed");
            return false;
        };
        match tx.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.count_drop(&record.session_id, "queue full");
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.count_drop(&record.session_id, "closed");
                false
            }
        }
    }

    fn count_drop(&self, session_id: &str, reason: &str) {
        self.dropped.fetch_add(1, Ordering::SeqCst);
        tracing::warn!(session_id, reason, "stats record dropped");
        TraceEvent::StatsDropped {
            session_id: session_id.to_owned(),
            reason: reason.to_owned(),
        }
        .emit();
    }

    fn is_duplicate(&self, session_id: &str) -> bool {
        let now = Instant::now();
        let mut dedup = self.dedup.lock();
        dedup.retain(|_, at| now.duration_since(*at) < self.dedup_window);
        if dedup.contains_key(session_id) {
            return true;
        }
        dedup.insert(session_id.to_owned(), now);
        false
    }

    /// Records dropped at enqueue time (full queue or closed).
    pub fn dropped_count(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// Stop intake, drain the queue, and report `(saved, lost)`. Lost
    /// includes both failed writes and enqueue-time drops.
    pub async fn close(&self) -> (usize, usize) {
        // Dropping the sender ends the worker's recv loop after the drain.
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        let (saved, write_lost) = match worker {
            Some(handle) => handle.await.unwrap_or((0, 0)),
            None => (0, 0),
        };
        let lost = write_lost + self.dropped_count();
        TraceEvent::StatsDrained { saved, lost }.emit();
        (saved, lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingSink {
        records: Mutex<Vec<StatsRecord>>,
        delay: Duration,
        fail: bool,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                records: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
                fail: false,
            })
        }
    }

    #[async_trait::async_trait]
    impl StatsSink for RecordingSink {
        async fn write(&self, record: &StatsRecord) -> Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(Error::Persistence("sink down".into()));
            }
            self.records.lock().push(record.clone());
            Ok(())
        }
    }

    fn record(session_id: &str) -> StatsRecord {
        StatsRecord {
            session_id: session_id.into(),
            user_id: 1,
            conversation_id: 100,
            stats: AgentStats::default(),
            ts: Utc::now(),
        }
    }

    fn config(capacity: usize, dedup_secs: u64) -> StatsConfig {
        StatsConfig {
            queue_capacity: capacity,
            write_timeout_secs: 5,
            dedup_window_secs: dedup_secs,
        }
    }

    #[tokio::test]
    async fn drains_all_enqueued_on_close() {
        let sink = RecordingSink::new();
        let persister = StatsPersister::spawn(&config(16, 0), sink.clone());
        for i in 0..5 {
            assert!(persister.enqueue(record(&format!("s{i}"))));
        }
        let (saved, lost) = persister.close().await;
        assert_eq!(saved, 5);
        assert_eq!(lost, 0);
        assert_eq!(sink.records.lock().len(), 5);
    }

    #[tokio::test]
    async fn dedup_window_suppresses_same_session() {
        let sink = RecordingSink::new();
        let persister = StatsPersister::spawn(&config(16, 5), sink.clone());
        assert!(persister.enqueue(record("same")));
        assert!(!persister.enqueue(record("same")));
        assert!(persister.enqueue(record("other")));
        let (saved, _) = persister.close().await;
        assert_eq!(saved, 2);
    }

    #[tokio::test]
    async fn dedup_expires_after_window() {
        let sink = RecordingSink::new();
        let persister = StatsPersister::spawn(
            &StatsConfig {
                queue_capacity: 16,
                write_timeout_secs: 5,
                dedup_window_secs: 0,
            },
            sink.clone(),
        );
        assert!(persister.enqueue(record("same")));
        assert!(persister.enqueue(record("same")));
        let (saved, _) = persister.close().await;
        assert_eq!(saved, 2);
    }

    #[tokio::test]
    async fn full_queue_drops_and_reports() {
        let sink = Arc::new(RecordingSink {
            records: Mutex::new(Vec::new()),
            delay: Duration::from_millis(200),
            fail: false,
        });
        let persister = StatsPersister::spawn(&config(1, 0), sink);
        // First record occupies the worker; second fills the queue slot;
        // subsequent enqueues overflow.
        let mut accepted = 0;
        for i in 0..10 {
            if persister.enqueue(record(&format!("s{i}"))) {
                accepted += 1;
            }
        }
        assert!(accepted < 10);
        let (saved, lost) = persister.close().await;
        assert_eq!(saved, accepted);
        assert_eq!(lost, 10 - accepted);
    }

    #[tokio::test]
    async fn enqueue_after_close_is_lost() {
        let sink = RecordingSink::new();
        let persister = StatsPersister::spawn(&config(4, 0), sink);
        let (saved, _) = persister.close().await;
        assert_eq!(saved, 0);
        assert!(!persister.enqueue(record("late")));
        assert_eq!(persister.dropped_count(), 1);
    }

    #[tokio::test]
    async fn failed_writes_counted_as_lost() {
        let sink = Arc::new(RecordingSink {
            records: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            fail: true,
        });
        let persister = StatsPersister::spawn(&config(8, 0), sink);
        persister.enqueue(record("s1"));
        persister.enqueue(record("s2"));
        let (saved, lost) = persister.close().await;
        assert_eq!(saved, 0);
        assert_eq!(lost, 2);
    }
}
