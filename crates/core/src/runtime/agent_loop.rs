//! The ReAct executor: a bounded LLM↔tool loop.
//!
//! Per iteration the model either answers (loop ends), calls tools
//! structurally, or embeds calls in its text. Tool results re-enter the
//! conversation as synthetic user messages so the model can recover from
//! failures; a fixed set of success markers short-circuits the loop once a
//! side-effectful tool reports completion.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use av_domain::block::AgentStats;
use av_domain::error::{Error, Result};
use av_domain::event::{EventMeta, EventStatus, EventType, EventWithMeta, OccurrenceCounter, SafeCallback};
use av_domain::message::{Message, ToolCall};
use av_providers::{textcalls, ChatProvider};
use av_tools::{Tool, ToolContext};

use super::{add_usage, hits_success_marker, truncate_summary};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config and outcome
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AgentLoopConfig {
    pub system_prompt: String,
    pub max_iterations: u32,
    pub tool_timeout: Duration,
}

impl AgentLoopConfig {
    pub fn new(system_prompt: impl Into<String>, max_iterations: u32) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            max_iterations,
            tool_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The final answer content.
    pub content: String,
    pub stats: AgentStats,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// The loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_react_loop(
    provider: &Arc<dyn ChatProvider>,
    tools: &[Arc<dyn Tool>],
    tool_ctx: &ToolContext,
    config: &AgentLoopConfig,
    input: &str,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let descriptors: Vec<_> = tools.iter().map(|t| t.descriptor()).collect();
    let by_name: HashMap<&str, &Arc<dyn Tool>> =
        tools.iter().map(|t| (t.name(), t)).collect();

    let mut messages = vec![
        Message::system(&config.system_prompt),
        Message::user(input),
    ];
    // Concurrently readable by metrics while the loop mutates it.
    let stats = Mutex::new(AgentStats::default());
    let occurrences = OccurrenceCounter::new();

    for iteration in 1..=config.max_iterations {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        // Mask cold-start latency: the caller sees progress before the
        // first model byte arrives.
        if iteration == 1 {
            callback.emit(&EventWithMeta::new(EventType::Thinking, "正在思考…"));
        }

        let outcome = provider.chat_with_tools(&messages, &descriptors).await?;
        add_usage(&mut stats.lock(), &outcome.usage);

        let calls: Vec<ToolCall>;
        if outcome.tool_calls.is_empty() {
            let extracted = textcalls::extract(&outcome.content);
            if extracted.calls.is_empty() {
                // Plain answer: the loop is done.
                callback.emit(&EventWithMeta::new(EventType::Answer, &outcome.content));
                return Ok(RunOutcome {
                    content: outcome.content,
                    stats: stats.into_inner(),
                });
            }
            // Text-embedded calls: show the cleaned content, keep the raw
            // content (tool syntax included) in history.
            if !extracted.content.trim().is_empty() {
                callback.emit(&EventWithMeta::new(EventType::Answer, &extracted.content));
            }
            messages.push(Message::assistant(&outcome.content));
            calls = extracted.calls;
        } else {
            if !outcome.content.trim().is_empty() {
                callback.emit(&EventWithMeta::new(EventType::Answer, &outcome.content));
            }
            // History keeps the tool-call syntax alongside any content.
            let mut recorded = outcome.content.clone();
            for call in &outcome.tool_calls {
                recorded.push_str(&format!("\n[Tool: {}({})]", call.name, call.arguments_json));
            }
            messages.push(Message::assistant(recorded.trim_start()));
            calls = outcome.tool_calls;
        }

        let early_stop = execute_calls(
            &calls,
            &by_name,
            tool_ctx,
            config.tool_timeout,
            &mut messages,
            &stats,
            &occurrences,
            callback,
            cancel,
        )
        .await?;

        if let Some(final_content) = early_stop {
            callback.emit(&EventWithMeta::new(EventType::Answer, &final_content));
            return Ok(RunOutcome {
                content: final_content,
                stats: stats.into_inner(),
            });
        }

        tracing::debug!(iteration, "tool round complete, continuing loop");
    }

    Err(Error::Other(format!(
        "max iterations exceeded ({})",
        config.max_iterations
    )))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run each call in order. Returns `Some(final_answer)` when a result hits
/// a success marker (early stop), `None` to continue the loop.
#[allow(clippy::too_many_arguments)]
async fn execute_calls(
    calls: &[ToolCall],
    by_name: &HashMap<&str, &Arc<dyn Tool>>,
    tool_ctx: &ToolContext,
    tool_timeout: Duration,
    messages: &mut Vec<Message>,
    stats: &Mutex<AgentStats>,
    occurrences: &OccurrenceCounter,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<Option<String>> {
    for call in calls {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut use_meta = EventMeta::for_tool(&call.name, EventStatus::Running);
        use_meta.input_summary = Some(truncate_summary(&call.arguments_json, 200));
        use_meta.occurrence = Some(occurrences.next(&call.name));
        callback.emit(&EventWithMeta::new(EventType::ToolUse, "").with_meta(use_meta));

        let started = Instant::now();
        let (result, is_error) = match by_name.get(call.name.as_str()) {
            None => (format!("unknown tool: {}", call.name), true),
            Some(tool) => {
                stats.lock().tool_call_count += 1;
                let run = tool.run(tool_ctx, &call.arguments_json);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    outcome = tokio::time::timeout(tool_timeout, run) => match outcome {
                        Ok(Ok(output)) => (output, false),
                        Ok(Err(e)) => (format!("Error: {e}"), true),
                        Err(_) => (
                            format!("Error: tool {} timed out after {}s", call.name, tool_timeout.as_secs()),
                            true,
                        ),
                    },
                }
            }
        };

        let mut result_meta = EventMeta::for_tool(
            &call.name,
            if is_error { EventStatus::Error } else { EventStatus::Success },
        );
        result_meta.output_summary = Some(truncate_summary(&result, 200));
        result_meta.duration_ms = Some(started.elapsed().as_millis() as u64);
        callback.emit(&EventWithMeta::new(EventType::ToolResult, &result).with_meta(result_meta));

        messages.push(Message::tool_result(&call.name, &result));

        if !is_error && hits_success_marker(&result) {
            return Ok(Some(result));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_providers::scripted::ScriptedProvider;
    use av_providers::{ChatOutcome, Usage};
    use av_tools::builtin::schedule::{InMemoryScheduleStore, ScheduleAddTool};
    use av_tools::ToolCategory;

    fn collect() -> (SafeCallback, Arc<Mutex<Vec<EventWithMeta>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let cb = SafeCallback::new(Arc::new(move |ev: &EventWithMeta| {
            sink.lock().push(ev.clone());
            Ok(())
        }));
        (cb, events)
    }

    fn outcome(content: &str) -> ChatOutcome {
        ChatOutcome {
            content: content.into(),
            tool_calls: vec![],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                ..Default::default()
            },
        }
    }

    fn outcome_with_call(content: &str, name: &str, args: &str) -> ChatOutcome {
        ChatOutcome {
            content: content.into(),
            tool_calls: vec![ToolCall {
                name: name.into(),
                arguments_json: args.into(),
            }],
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                ..Default::default()
            },
        }
    }

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "memo_search"
        }
        fn description(&self) -> &str {
            "echo"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn category(&self) -> ToolCategory {
            ToolCategory::Memo
        }
        async fn run(&self, _ctx: &ToolContext, input_json: &str) -> av_domain::Result<String> {
            Ok(format!("echo: {input_json}"))
        }
    }

    struct FailingTool;

    #[async_trait::async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, _ctx: &ToolContext, _input: &str) -> av_domain::Result<String> {
            Err(Error::Other("backend unavailable".into()))
        }
    }

    fn loop_config() -> AgentLoopConfig {
        AgentLoopConfig::new("You are a helpful assistant.", 10)
    }

    async fn run(
        provider: ScriptedProvider,
        tools: Vec<Arc<dyn Tool>>,
        input: &str,
    ) -> (Result<RunOutcome>, Vec<EventWithMeta>) {
        let provider: Arc<dyn ChatProvider> = Arc::new(provider);
        let (cb, events) = collect();
        let result = run_react_loop(
            &provider,
            &tools,
            &ToolContext {
                user_id: 1,
                conversation_id: 100,
            },
            &loop_config(),
            input,
            &cb,
            &CancellationToken::new(),
        )
        .await;
        let events = events.lock().clone();
        (result, events)
    }

    #[tokio::test]
    async fn plain_answer_short_circuits() {
        let provider = ScriptedProvider::new("p", vec![outcome("你好!")]);
        let (result, events) = run(provider, vec![], "hi").await;
        let outcome = result.unwrap();
        assert_eq!(outcome.content, "你好!");
        assert_eq!(outcome.stats.llm_call_count, 1);
        let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![EventType::Thinking, EventType::Answer]);
    }

    #[tokio::test]
    async fn structured_tool_call_round() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                outcome_with_call("", "memo_search", r#"{"query":"Python"}"#),
                outcome("找到了 3 条 Python 笔记"),
            ],
        );
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
        let (result, events) = run(provider, tools, "找一下关于 Python 的笔记").await;

        let outcome = result.unwrap();
        assert_eq!(outcome.content, "找到了 3 条 Python 笔记");
        assert_eq!(outcome.stats.llm_call_count, 2);
        assert_eq!(outcome.stats.tool_call_count, 1);

        let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::Thinking,
                EventType::ToolUse,
                EventType::ToolResult,
                EventType::Answer,
            ]
        );
        // The tool result meta carries timing and occurrence on the use event.
        let use_meta = events[1].meta.as_ref().unwrap();
        assert_eq!(use_meta.occurrence, Some(1));
        let result_meta = events[2].meta.as_ref().unwrap();
        assert_eq!(result_meta.status, Some(EventStatus::Success));
        assert!(result_meta.duration_ms.is_some());
    }

    #[tokio::test]
    async fn text_embedded_call_strips_syntax_and_continues() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                outcome(r#"正在查找…[Tool: memo_search({"query":"x"})] 稍等。"#),
                outcome("完成"),
            ],
        );
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
        let (result, events) = run(provider, tools, "查找").await;

        assert_eq!(result.unwrap().content, "完成");
        // Visible answer had the tool syntax stripped.
        let first_answer = events
            .iter()
            .find(|e| e.event_type == EventType::Answer)
            .unwrap();
        assert_eq!(first_answer.content, "正在查找… 稍等。");
        let kinds: Vec<EventType> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                EventType::Thinking,
                EventType::Answer,
                EventType::ToolUse,
                EventType::ToolResult,
                EventType::Answer,
            ]
        );
    }

    #[tokio::test]
    async fn early_stop_on_success_marker() {
        let store = Arc::new(InMemoryScheduleStore::new());
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(ScheduleAddTool::new(store, 1))];
        let provider = ScriptedProvider::new(
            "p",
            vec![outcome_with_call(
                "",
                "schedule_add",
                r#"{"title":"开会","when":"明天 15:00"}"#,
            )],
        );
        let (result, events) = run(provider, tools, "明天下午 3 点开会").await;

        let outcome = result.unwrap();
        // The final answer is exactly the tool result.
        assert_eq!(outcome.content, "✓ 已创建: 明天 15:00 开会 (ID=1)");
        assert_eq!(outcome.stats.llm_call_count, 1);
        let last = events.last().unwrap();
        assert_eq!(last.event_type, EventType::Answer);
        assert_eq!(last.content, outcome.content);
    }

    #[tokio::test]
    async fn unknown_tool_is_non_fatal() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                outcome_with_call("", "ghost_tool", "{}"),
                outcome("没有那个工具，我直接回答"),
            ],
        );
        let (result, events) = run(provider, vec![], "test").await;
        assert_eq!(result.unwrap().content, "没有那个工具，我直接回答");
        let tool_result = events
            .iter()
            .find(|e| e.event_type == EventType::ToolResult)
            .unwrap();
        assert_eq!(tool_result.content, "unknown tool: ghost_tool");
        assert_eq!(
            tool_result.meta.as_ref().unwrap().status,
            Some(EventStatus::Error)
        );
    }

    #[tokio::test]
    async fn tool_error_fed_back_to_model() {
        let provider = ScriptedProvider::new(
            "p",
            vec![
                outcome_with_call("", "broken", "{}"),
                outcome("后端出了点问题，请稍后再试"),
            ],
        );
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FailingTool)];

        let provider: Arc<dyn ChatProvider> = Arc::new(provider);
        let (cb, events) = collect();
        let result = run_react_loop(
            &provider,
            &tools,
            &ToolContext::default(),
            &loop_config(),
            "do it",
            &cb,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.content, "后端出了点问题，请稍后再试");

        // The error round-tripped through the synthetic user message.
        let events = events.lock();
        let tool_result = events
            .iter()
            .find(|e| e.event_type == EventType::ToolResult)
            .unwrap();
        assert!(tool_result.content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn max_iterations_exceeded_errors() {
        // The model calls the tool forever.
        let script: Vec<ChatOutcome> = (0..12)
            .map(|_| outcome_with_call("", "memo_search", "{}"))
            .collect();
        let provider = ScriptedProvider::new("p", script);
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(EchoTool)];
        let (result, _) = run(provider, tools, "loop").await;
        let err = result.unwrap_err();
        assert!(err.to_string().contains("max iterations exceeded"));
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let provider = ScriptedProvider::always("p", "never seen");
        let provider: Arc<dyn ChatProvider> = Arc::new(provider);
        let (cb, _) = collect();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_react_loop(
            &provider,
            &[],
            &ToolContext::default(),
            &loop_config(),
            "hi",
            &cb,
            &cancel,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
