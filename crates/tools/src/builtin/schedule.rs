//! Schedule tools — thin adapters over the external schedule store.

use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

use av_domain::error::{Error, Result};

use crate::{Tool, ToolCategory, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct ScheduleItem {
    pub id: i64,
    pub title: String,
    /// Human-readable time, already resolved by the caller or the model.
    pub when: String,
}

#[async_trait::async_trait]
pub trait ScheduleBackend: Send + Sync {
    async fn add(&self, user_id: i64, title: &str, when: &str) -> Result<i64>;
    async fn query(&self, user_id: i64, range: &str) -> Result<Vec<ScheduleItem>>;
}

/// In-memory backend used by tests and local runs without storage.
#[derive(Default)]
pub struct InMemoryScheduleStore {
    items: RwLock<HashMap<i64, Vec<ScheduleItem>>>,
    next_id: RwLock<i64>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ScheduleBackend for InMemoryScheduleStore {
    async fn add(&self, user_id: i64, title: &str, when: &str) -> Result<i64> {
        let mut next = self.next_id.write();
        *next += 1;
        let id = *next;
        self.items.write().entry(user_id).or_default().push(ScheduleItem {
            id,
            title: title.to_owned(),
            when: when.to_owned(),
        });
        Ok(id)
    }

    async fn query(&self, user_id: i64, _range: &str) -> Result<Vec<ScheduleItem>> {
        Ok(self.items.read().get(&user_id).cloned().unwrap_or_default())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// schedule_add
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct AddArgs {
    title: String,
    when: String,
}

pub struct ScheduleAddTool {
    backend: Arc<dyn ScheduleBackend>,
    user_id: i64,
}

impl ScheduleAddTool {
    pub fn new(backend: Arc<dyn ScheduleBackend>, user_id: i64) -> Self {
        Self { backend, user_id }
    }
}

#[async_trait::async_trait]
impl Tool for ScheduleAddTool {
    fn name(&self) -> &str {
        "schedule_add"
    }
    fn description(&self) -> &str {
        "Add an item to the user's schedule"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": { "type": "string", "description": "What the item is" },
                "when": { "type": "string", "description": "Resolved time, e.g. \"明天 15:00\"" }
            },
            "required": ["title", "when"]
        })
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Schedule
    }
    fn tags(&self) -> Vec<&str> {
        vec!["schedule", "write"]
    }

    async fn run(&self, _ctx: &ToolContext, input_json: &str) -> Result<String> {
        let args: AddArgs = serde_json::from_str(input_json)
            .map_err(|e| Error::Validation(format!("schedule_add arguments: {e}")))?;
        let id = self.backend.add(self.user_id, &args.title, &args.when).await?;
        // The leading marker is load-bearing: the agent loop early-stops on it.
        Ok(format!("✓ 已创建: {} {} (ID={id})", args.when, args.title))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// schedule_query
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct QueryArgs {
    #[serde(default = "d_range")]
    range: String,
}

fn d_range() -> String {
    "today".into()
}

pub struct ScheduleQueryTool {
    backend: Arc<dyn ScheduleBackend>,
    user_id: i64,
}

impl ScheduleQueryTool {
    pub fn new(backend: Arc<dyn ScheduleBackend>, user_id: i64) -> Self {
        Self { backend, user_id }
    }
}

#[async_trait::async_trait]
impl Tool for ScheduleQueryTool {
    fn name(&self) -> &str {
        "schedule_query"
    }
    fn description(&self) -> &str {
        "Query the user's schedule for a time range"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "range": { "type": "string", "description": "today | tomorrow | week", "default": "today" }
            }
        })
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Schedule
    }
    fn tags(&self) -> Vec<&str> {
        vec!["schedule", "read"]
    }

    async fn run(&self, _ctx: &ToolContext, input_json: &str) -> Result<String> {
        let args: QueryArgs = if input_json.trim().is_empty() {
            QueryArgs { range: d_range() }
        } else {
            serde_json::from_str(input_json)
                .map_err(|e| Error::Validation(format!("schedule_query arguments: {e}")))?
        };
        let items = self.backend.query(self.user_id, &args.range).await?;
        if items.is_empty() {
            return Ok(format!("{} 没有日程安排", args.range));
        }
        let mut out = format!("{} 的日程:\n", args.range);
        for item in &items {
            out.push_str(&format!("- {} {} (ID={})\n", item.when, item.title, item.id));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_returns_success_marker() {
        let store = Arc::new(InMemoryScheduleStore::new());
        let add = ScheduleAddTool::new(store.clone(), 1);
        let out = add
            .run(
                &ToolContext::default(),
                r#"{"title":"开会","when":"明天 15:00"}"#,
            )
            .await
            .unwrap();
        assert_eq!(out, "✓ 已创建: 明天 15:00 开会 (ID=1)");
    }

    #[tokio::test]
    async fn query_empty_arguments_defaults_to_today() {
        let store = Arc::new(InMemoryScheduleStore::new());
        let query = ScheduleQueryTool::new(store, 1);
        let out = query.run(&ToolContext::default(), "").await.unwrap();
        assert!(out.contains("today"));
    }

    #[tokio::test]
    async fn query_lists_added_items() {
        let store = Arc::new(InMemoryScheduleStore::new());
        store.add(1, "站会", "周一 09:30").await.unwrap();
        let query = ScheduleQueryTool::new(store, 1);
        let out = query
            .run(&ToolContext::default(), r#"{"range":"week"}"#)
            .await
            .unwrap();
        assert!(out.contains("站会"));
        assert!(out.contains("ID=1"));
    }
}
