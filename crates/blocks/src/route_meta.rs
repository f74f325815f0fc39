//! Durable routing metadata.
//!
//! Persists the last routing decision per conversation in
//! `<state>/route_meta.json` so sticky routing survives process restarts.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use av_domain::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMetadata {
    pub last_agent: String,
    pub last_intent: String,
    pub last_intent_confidence: f64,
    pub sticky_expires_at: DateTime<Utc>,
}

impl RouteMetadata {
    pub fn is_sticky_valid(&self) -> bool {
        self.sticky_expires_at > Utc::now()
    }
}

pub struct RouteMetaStore {
    path: Option<PathBuf>,
    entries: RwLock<HashMap<i64, RouteMetadata>>,
}

impl RouteMetaStore {
    /// Load or create the store at `state_path/route_meta.json`.
    pub fn new(state_path: &std::path::Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let path = state_path.join("route_meta.json");
        let entries = if path.exists() {
            let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, conversation_id: i64) -> Option<RouteMetadata> {
        self.entries.read().get(&conversation_id).cloned()
    }

    /// Record a successful route and arm the sticky window.
    pub fn record_route(
        &self,
        conversation_id: i64,
        agent: &str,
        intent: &str,
        confidence: f64,
        sticky_window: Duration,
    ) {
        let meta = RouteMetadata {
            last_agent: agent.to_owned(),
            last_intent: intent.to_owned(),
            last_intent_confidence: confidence,
            sticky_expires_at: Utc::now()
                + chrono::Duration::from_std(sticky_window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        };
        self.entries.write().insert(conversation_id, meta);
        self.save();
    }

    /// Clear sticky state (conversation scope change or explicit reset).
    pub fn clear(&self, conversation_id: i64) {
        self.entries.write().remove(&conversation_id);
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let entries = self.entries.read();
        match serde_json::to_string_pretty(&*entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    tracing::warn!(path = %path.display(), error = %e, "route metadata save failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "route metadata serialize failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_and_expire() {
        let store = RouteMetaStore::in_memory();
        store.record_route(100, "memo", "memo_search", 0.92, Duration::from_secs(300));

        let meta = store.get(100).unwrap();
        assert_eq!(meta.last_agent, "memo");
        assert!(meta.is_sticky_valid());

        store.record_route(100, "memo", "memo_search", 0.92, Duration::ZERO);
        assert!(!store.get(100).unwrap().is_sticky_valid());
    }

    #[test]
    fn clear_removes_entry() {
        let store = RouteMetaStore::in_memory();
        store.record_route(100, "memo", "memo_search", 0.9, Duration::from_secs(60));
        store.clear(100);
        assert!(store.get(100).is_none());
    }

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = RouteMetaStore::new(dir.path()).unwrap();
            store.record_route(7, "schedule", "schedule_add", 0.88, Duration::from_secs(600));
        }
        let reloaded = RouteMetaStore::new(dir.path()).unwrap();
        let meta = reloaded.get(7).unwrap();
        assert_eq!(meta.last_agent, "schedule");
        assert_eq!(meta.last_intent_confidence, 0.88);
    }
}
