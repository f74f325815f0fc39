//! End-to-end request flows through the assistant facade, with scripted
//! providers standing in for the LLM.

use parking_lot::Mutex;
use std::sync::Arc;

use av_blocks::stats::{StatsRecord, StatsSink};
use av_core::memory::InMemoryMemoryStore;
use av_core::{AppState, Assistant, ChatRequest};
use av_domain::block::BlockStatus;
use av_domain::config::AppConfig;
use av_domain::error::Result;
use av_domain::event::{EventCallback, EventType, EventWithMeta};
use av_domain::message::ToolCall;
use av_providers::scripted::ScriptedProvider;
use av_providers::{ChatOutcome, ChatProvider, ProviderRegistry, Usage};
use av_tools::ToolRegistry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct RecordingStatsSink {
    records: Mutex<Vec<StatsRecord>>,
}

#[async_trait::async_trait]
impl StatsSink for RecordingStatsSink {
    async fn write(&self, record: &StatsRecord) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

struct Harness {
    assistant: Assistant,
    chat: Arc<ScriptedProvider>,
    stats_sink: Arc<RecordingStatsSink>,
    // Keeps the parrot config dir alive for the test's duration.
    _parrot_dir: tempfile::TempDir,
}

fn harness(chat_script: Vec<ChatOutcome>) -> Harness {
    let parrot_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        parrot_dir.path().join("memo.yaml"),
        r#"
name: memo
display_name: Memo Parrot
strategy: react
tools: [memo_search, memo_create]
system_prompt: |
  You manage the user's memos.
enable_cache: true
cache_ttl: "5m"
cache_size: 16
self_description:
  title: Memo assistant
  name: memo
  capabilities: [search, create]
"#,
    )
    .unwrap();
    std::fs::write(
        parrot_dir.path().join("schedule.yaml"),
        r#"
name: schedule
display_name: Schedule Parrot
strategy: react
tools: [schedule_add, schedule_query]
system_prompt: |
  You manage the user's schedule.
self_description:
  title: Schedule assistant
  name: schedule
  capabilities: [add, query]
"#,
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.parrots.config_dir = parrot_dir.path().to_path_buf();

    let chat = Arc::new(ScriptedProvider::new("chat", chat_script));
    let providers = Arc::new(ProviderRegistry::new());
    providers.register(chat.clone() as Arc<dyn ChatProvider>);
    providers.set_role("chat", "chat");
    // A dedicated small model for the side roles keeps the chat script
    // (and its call counter) untouched by memory generation and routing.
    let small: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::always("small", "总结"));
    providers.register(small);
    providers.set_role("intent", "small");
    providers.set_role("embedding", "small");
    providers.set_role("summary", "small");

    let tools = Arc::new(ToolRegistry::new());
    av_tools::builtin::register_builtin(
        &tools,
        Arc::new(av_tools::builtin::memo::InMemoryMemoStore::new()),
        Arc::new(av_tools::builtin::schedule::InMemoryScheduleStore::new()),
    )
    .unwrap();

    let stats_sink = Arc::new(RecordingStatsSink::default());
    let state = AppState::build_in_memory(
        config,
        providers,
        tools,
        Arc::new(InMemoryMemoryStore::default()),
        stats_sink.clone(),
    )
    .unwrap();

    Harness {
        assistant: Assistant::new(state),
        chat,
        stats_sink,
        _parrot_dir: parrot_dir,
    }
}

fn collecting() -> (EventCallback, Arc<Mutex<Vec<EventWithMeta>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let cb: EventCallback = Arc::new(move |ev: &EventWithMeta| {
        sink.lock().push(ev.clone());
        Ok(())
    });
    (cb, events)
}

fn answer(content: &str) -> ChatOutcome {
    ChatOutcome {
        content: content.into(),
        tool_calls: vec![],
        usage: Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            ..Default::default()
        },
    }
}

fn tool_call(name: &str, args: &str) -> ChatOutcome {
    ChatOutcome {
        content: String::new(),
        tool_calls: vec![ToolCall {
            name: name.into(),
            arguments_json: args.into(),
        }],
        usage: Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
            ..Default::default()
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scenarios
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn structured_tool_call_event_order_and_stats() {
    let h = harness(vec![
        tool_call("memo_search", r#"{"query":"Python"}"#),
        answer("没有找到 Python 相关的笔记"),
    ]);
    let (cb, events) = collecting();

    let result = h
        .assistant
        .handle(ChatRequest::new(1, 100, "找一下关于 Python 的笔记"), cb)
        .await
        .unwrap();

    assert_eq!(result.route.route, "memo");
    assert_eq!(result.stats.llm_call_count, 2);
    assert_eq!(result.stats.tool_call_count, 1);

    let kinds: Vec<EventType> = events.lock().iter().map(|e| e.event_type).collect();
    assert_eq!(
        kinds,
        vec![
            EventType::Thinking,
            EventType::ToolUse,
            EventType::ToolResult,
            EventType::Answer,
        ]
    );

    // The block recorded the same stream and completed.
    let block = h.assistant.state().blocks.get_block(&result.block_id).unwrap();
    assert_eq!(block.status, BlockStatus::Completed);
    assert_eq!(block.event_stream.len(), 4);
    assert_eq!(block.session_stats.llm_call_count, 2);
    // Event timestamps never decrease.
    assert!(block
        .event_stream
        .windows(2)
        .all(|pair| pair[0].ts <= pair[1].ts));
}

#[tokio::test]
async fn cached_hit_path_makes_zero_llm_calls() {
    let h = harness(vec![answer("已为你找到 3 条 Go 笔记")]);

    let (cb, _) = collecting();
    let first = h
        .assistant
        .handle(ChatRequest::new(1, 100, "搜索 Go 笔记"), cb)
        .await
        .unwrap();
    assert_eq!(h.chat.chat_call_count(), 1);

    let (cb, events) = collecting();
    let second = h
        .assistant
        .handle(ChatRequest::new(1, 100, "搜索 Go 笔记"), cb)
        .await
        .unwrap();

    // Same content, no further model traffic, cache-tagged events.
    assert_eq!(second.content, first.content);
    assert_eq!(h.chat.chat_call_count(), 1);
    assert_eq!(second.stats.llm_call_count, 0);
    let events = events.lock();
    let cache_tagged = events.iter().any(|e| {
        e.meta
            .as_ref()
            .map(|m| m.extra.get("method") == Some(&serde_json::json!("cache")))
            .unwrap_or(false)
    });
    assert!(cache_tagged, "expected events tagged method=cache");
}

#[tokio::test]
async fn early_stop_on_schedule_success_marker() {
    let h = harness(vec![tool_call(
        "schedule_add",
        r#"{"title":"开会","when":"明天 15:00"}"#,
    )]);
    let (cb, events) = collecting();

    let result = h
        .assistant
        .handle(ChatRequest::new(1, 100, "明天下午 3 点开会"), cb)
        .await
        .unwrap();

    assert_eq!(result.route.route, "schedule");
    assert_eq!(result.content, "✓ 已创建: 明天 15:00 开会 (ID=1)");
    // One LLM call: the loop stopped inside the first iteration.
    assert_eq!(result.stats.llm_call_count, 1);

    let last = events.lock().last().cloned().unwrap();
    assert_eq!(last.event_type, EventType::Answer);
    assert_eq!(last.content, result.content);

    let block = h.assistant.state().blocks.get_block(&result.block_id).unwrap();
    assert_eq!(block.status, BlockStatus::Completed);
}

#[tokio::test]
async fn pii_scrubbed_from_answer_and_block() {
    let h = harness(vec![answer("联系 13800138000 或 foo@bar.com")]);
    let (cb, events) = collecting();

    let result = h
        .assistant
        .handle(ChatRequest::new(1, 100, "帮我记下联系方式的笔记"), cb)
        .await
        .unwrap();

    let expected = "联系 138****8000 或 f**@b**.com";
    assert_eq!(result.content, expected);

    // Live event and persisted block both carry the masked form.
    let events = events.lock();
    let live_answer = events
        .iter()
        .find(|e| e.event_type == EventType::Answer)
        .unwrap();
    assert_eq!(live_answer.content, expected);

    let block = h.assistant.state().blocks.get_block(&result.block_id).unwrap();
    assert_eq!(block.assistant_content, expected);
    let persisted_answer = block
        .event_stream
        .iter()
        .find(|e| e.event_type == EventType::Answer)
        .unwrap();
    assert_eq!(persisted_answer.content, expected);
}

#[tokio::test]
async fn failed_run_marks_block_error_with_terminal_event() {
    // Empty script: the first LLM call fails.
    let h = harness(vec![]);
    let (cb, events) = collecting();

    let err = h
        .assistant
        .handle(ChatRequest::new(1, 100, "搜索 Go 笔记"), cb)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("script exhausted"));

    let events = events.lock();
    let last = events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);

    // Exactly one terminal event ended the stream.
    let terminal_count = events.iter().filter(|e| e.event_type.is_terminal()).count();
    assert_eq!(terminal_count, 1);

    let blocks = h.assistant.state().blocks.list_blocks(100, None, 10);
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].status, BlockStatus::Error);
}

#[tokio::test]
async fn stats_drain_on_close_reports_saved_records() {
    let h = harness(vec![
        answer("第一轮完成"),
        answer("第二轮完成"),
    ]);

    let (cb, _) = collecting();
    h.assistant
        .handle(ChatRequest::new(1, 100, "搜索 Go 笔记"), cb.clone())
        .await
        .unwrap();
    h.assistant
        .handle(ChatRequest::new(1, 101, "找找周报笔记"), cb)
        .await
        .unwrap();

    let (saved, lost) = h.assistant.close().await;
    assert_eq!(saved, 2);
    assert_eq!(lost, 0);
    assert_eq!(h.stats_sink.records.lock().len(), 2);
}

#[tokio::test]
async fn explicit_agent_override_routes_directly() {
    let h = harness(vec![answer("日程方面有什么可以帮你？")]);
    let (cb, _) = collecting();

    let req = ChatRequest {
        requested_agent: Some("schedule".into()),
        ..ChatRequest::new(1, 100, "你好")
    };
    let result = h.assistant.handle(req, cb).await.unwrap();
    assert_eq!(result.route.route, "schedule");
    assert_eq!(result.route.method, "mode_override");
}

#[tokio::test]
async fn follow_up_block_appends_user_input() {
    let h = harness(vec![answer("第一轮")]);
    let (cb, _) = collecting();
    let first = h
        .assistant
        .handle(ChatRequest::new(1, 100, "搜索 Go 笔记"), cb.clone())
        .await
        .unwrap();

    // The first block completed, so a follow-up opens a new block.
    let req = ChatRequest {
        follow_up_block: Some(first.block_id.clone()),
        ..ChatRequest::new(1, 100, "搜索 Go 笔记")
    };
    let second = h.assistant.handle(req, cb).await.unwrap();
    assert_ne!(second.block_id, first.block_id);
    // (The cache answered the second run, so the script is not consumed.)

    let blocks = h.assistant.state().blocks.list_blocks(100, None, 10);
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[1].round_number, 2);
}
