//! Memo tools — thin adapters over the external memo store.

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
pub struct MemoHit {
    pub id: i64,
    pub content: String,
}

/// The memo CRUD layer lives outside the core; tools reach it through this
/// trait.
#[async_trait::async_trait]
pub trait MemoBackend: Send + Sync {
    async fn search(&self, user_id: i64, query: &str) -> Result<Vec<MemoHit>>;
    async fn create(&self, user_id: i64, content: &str) -> Result<i64>;
}

/// In-memory backend used by tests and local runs without storage.
#[derive(Default)]
pub struct InMemoryMemoStore {
    memos: RwLock<HashMap<i64, Vec<MemoHit>>>,
    next_id: RwLock<i64>,
}

impl InMemoryMemoStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl MemoBackend for InMemoryMemoStore {
    async fn search(&self, user_id: i64, query: &str) -> Result<Vec<MemoHit>> {
        let memos = self.memos.read();
        Ok(memos
            .get(&user_id)
            .map(|list| {
                list.iter()
                    .filter(|m| m.content.contains(query))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create(&self, user_id: i64, content: &str) -> Result<i64> {
        let mut next = self.next_id.write();
        *next += 1;
        let id = *next;
        self.memos.write().entry(user_id).or_default().push(MemoHit {
            id,
            content: content.to_owned(),
        });
        Ok(id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memo_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "d_limit")]
    limit: usize,
}

fn d_limit() -> usize {
    10
}

pub struct MemoSearchTool {
    backend: Arc<dyn MemoBackend>,
    user_id: i64,
}

impl MemoSearchTool {
    pub fn new(backend: Arc<dyn MemoBackend>, user_id: i64) -> Self {
        Self { backend, user_id }
    }
}

#[async_trait::async_trait]
impl Tool for MemoSearchTool {
    fn name(&self) -> &str {
        "memo_search"
    }
    fn description(&self) -> &str {
        "Search the user's memos by keyword"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Keyword to search for" },
                "limit": { "type": "integer", "description": "Max results", "default": 10 }
            },
            "required": ["query"]
        })
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Memo
    }
    fn tags(&self) -> Vec<&str> {
        vec!["memo", "read"]
    }

    async fn run(&self, _ctx: &ToolContext, input_json: &str) -> Result<String> {
        let args: SearchArgs = serde_json::from_str(input_json)
            .map_err(|e| Error::Validation(format!("memo_search arguments: {e}")))?;
        let hits = self.backend.search(self.user_id, &args.query).await?;
        if hits.is_empty() {
            return Ok(format!("未找到与「{}」相关的笔记", args.query));
        }
        let mut out = format!("找到 {} 条笔记:\n", hits.len().min(args.limit));
        for hit in hits.iter().take(args.limit) {
            out.push_str(&format!("- [{}] {}\n", hit.id, hit.content));
        }
        Ok(out)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memo_create
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct CreateArgs {
    content: String,
}

pub struct MemoCreateTool {
    backend: Arc<dyn MemoBackend>,
    user_id: i64,
}

impl MemoCreateTool {
    pub fn new(backend: Arc<dyn MemoBackend>, user_id: i64) -> Self {
        Self { backend, user_id }
    }
}

#[async_trait::async_trait]
impl Tool for MemoCreateTool {
    fn name(&self) -> &str {
        "memo_create"
    }
    fn description(&self) -> &str {
        "Create a new memo for the user"
    }
    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Memo text" }
            },
            "required": ["content"]
        })
    }
    fn category(&self) -> ToolCategory {
        ToolCategory::Memo
    }
    fn tags(&self) -> Vec<&str> {
        vec!["memo", "write"]
    }

    async fn run(&self, _ctx: &ToolContext, input_json: &str) -> Result<String> {
        let args: CreateArgs = serde_json::from_str(input_json)
            .map_err(|e| Error::Validation(format!("memo_create arguments: {e}")))?;
        if args.content.trim().is_empty() {
            return Err(Error::Validation("memo content must not be empty".into()));
        }
        let id = self.backend.create(self.user_id, &args.content).await?;
        // The leading marker is load-bearing: the agent loop early-stops on it.
        Ok(format!("✓ 已创建: 笔记 (ID={id})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_tool(store: Arc<InMemoryMemoStore>, user: i64) -> MemoSearchTool {
        MemoSearchTool::new(store, user)
    }

    #[tokio::test]
    async fn create_then_search() {
        let store = Arc::new(InMemoryMemoStore::new());
        let create = MemoCreateTool::new(store.clone(), 1);
        let ctx = ToolContext::default();

        let out = create
            .run(&ctx, r#"{"content":"学习 Python 装饰器"}"#)
            .await
            .unwrap();
        assert!(out.starts_with("✓ 已创建"));

        let search = search_tool(store, 1);
        let out = search.run(&ctx, r#"{"query":"Python"}"#).await.unwrap();
        assert!(out.contains("学习 Python 装饰器"));
    }

    #[tokio::test]
    async fn search_scoped_to_user() {
        let store = Arc::new(InMemoryMemoStore::new());
        store.create(1, "only for user one").await.unwrap();

        let search = search_tool(store, 2);
        let out = search
            .run(&ToolContext::default(), r#"{"query":"user"}"#)
            .await
            .unwrap();
        assert!(out.contains("未找到"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_validation_errors() {
        let store = Arc::new(InMemoryMemoStore::new());
        let search = search_tool(store, 1);
        let err = search
            .run(&ToolContext::default(), "not json")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
