//! The planning executor: one plan call, a dependency-aware concurrent
//! tool fan-out, one synthesis call.
//!
//! The plan is a JSON list of steps `{tool, arguments, depends_on}`. Steps
//! whose dependencies are satisfied run concurrently; results are
//! reassembled in declared order before the synthesis call. A plan the
//! model fails to produce degrades to a direct answer.

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use av_domain::block::AgentStats;
use av_domain::error::{Error, Result};
use av_domain::event::{EventMeta, EventStatus, EventType, EventWithMeta, OccurrenceCounter, SafeCallback};
use av_domain::message::Message;
use av_providers::ChatProvider;
use av_tools::{Tool, ToolContext};

use super::agent_loop::{AgentLoopConfig, RunOutcome};
use super::{add_usage, truncate_summary};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct PlanStep {
    pub tool: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    /// Indices of steps that must complete first.
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize)]
struct Plan {
    #[serde(default)]
    steps: Vec<PlanStep>,
}

/// Parse a plan out of model output, tolerating markdown fences.
pub fn parse_plan(content: &str) -> Option<Vec<PlanStep>> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed);
    let plan: Plan = serde_json::from_str(body.trim()).ok()?;
    if plan.steps.is_empty() {
        return None;
    }
    Some(plan.steps)
}

fn plan_prompt(input: &str) -> String {
    format!(
        "Decompose the request into tool calls. Respond with pure JSON, no prose:\n\
         {{\"steps\": [{{\"tool\": \"<name>\", \"arguments\": {{...}}, \"depends_on\": [<indices>]}}]}}\n\
         Request: {input}"
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Executor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_planning(
    provider: &Arc<dyn ChatProvider>,
    tools: &[Arc<dyn Tool>],
    tool_ctx: &ToolContext,
    config: &AgentLoopConfig,
    input: &str,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let by_name: HashMap<String, Arc<dyn Tool>> =
        tools.iter().map(|t| (t.name().to_owned(), t.clone())).collect();
    let stats = Arc::new(Mutex::new(AgentStats::default()));
    let occurrences = Arc::new(OccurrenceCounter::new());

    // ── Phase 1: plan ──────────────────────────────────────────────
    callback.emit(&EventWithMeta::new(EventType::PhaseChange, "planning"));

    let plan_messages = vec![
        Message::system(&config.system_prompt),
        Message::user(plan_prompt(input)),
    ];
    let planned = provider.chat_with_tools(&plan_messages, &[]).await?;
    add_usage(&mut stats.lock(), &planned.usage);

    let Some(steps) = parse_plan(&planned.content) else {
        // No executable plan: the plan call's content is the answer.
        callback.emit(&EventWithMeta::new(EventType::Answer, &planned.content));
        let stats = stats.lock().clone();
        return Ok(RunOutcome {
            content: planned.content,
            stats,
        });
    };

    // ── Phase 2: execute in dependency waves ───────────────────────
    callback.emit(&EventWithMeta::new(EventType::PhaseChange, "executing"));

    let total = steps.len();
    let mut results: Vec<Option<String>> = vec![None; total];
    let mut done: HashSet<usize> = HashSet::new();

    while done.len() < total {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let ready: Vec<usize> = (0..total)
            .filter(|i| !done.contains(i))
            .filter(|i| steps[*i].depends_on.iter().all(|d| done.contains(d)))
            .collect();

        if ready.is_empty() {
            return Err(Error::Validation(
                "plan has a dependency cycle or out-of-range depends_on".into(),
            ));
        }

        let wave = join_all(ready.iter().map(|&i| {
            let step = steps[i].clone();
            let tool = by_name.get(&step.tool).cloned();
            let stats = stats.clone();
            let occurrences = occurrences.clone();
            let callback = callback.clone();
            let tool_ctx = *tool_ctx;
            let tool_timeout = config.tool_timeout;
            async move {
                let args = step.arguments.to_string();

                let mut use_meta = EventMeta::for_tool(&step.tool, EventStatus::Running);
                use_meta.input_summary = Some(truncate_summary(&args, 200));
                use_meta.occurrence = Some(occurrences.next(&step.tool));
                callback.emit(&EventWithMeta::new(EventType::ToolUse, "").with_meta(use_meta));

                let started = Instant::now();
                let (result, is_error) = match tool {
                    None => (format!("unknown tool: {}", step.tool), true),
                    Some(tool) => {
                        stats.lock().tool_call_count += 1;
                        match tokio::time::timeout(tool_timeout, tool.run(&tool_ctx, &args)).await {
                            Ok(Ok(output)) => (output, false),
                            Ok(Err(e)) => (format!("Error: {e}"), true),
                            Err(_) => (format!("Error: tool {} timed out", step.tool), true),
                        }
                    }
                };

                let mut result_meta = EventMeta::for_tool(
                    &step.tool,
                    if is_error { EventStatus::Error } else { EventStatus::Success },
                );
                result_meta.output_summary = Some(truncate_summary(&result, 200));
                result_meta.duration_ms = Some(started.elapsed().as_millis() as u64);
                callback.emit(
                    &EventWithMeta::new(EventType::ToolResult, &result).with_meta(result_meta),
                );

                (i, result)
            }
        }))
        .await;

        for (i, result) in wave {
            results[i] = Some(result);
            done.insert(i);
        }

        callback.emit(&EventWithMeta::new(
            EventType::Progress,
            format!("{}/{} 步骤完成", done.len(), total),
        ));
    }

    // ── Phase 3: synthesis ─────────────────────────────────────────
    callback.emit(&EventWithMeta::new(EventType::PhaseChange, "synthesis"));

    let mut messages = vec![
        Message::system(&config.system_prompt),
        Message::user(input),
    ];
    // Declared order, regardless of completion order.
    for (step, result) in steps.iter().zip(results.iter()) {
        let result = result.as_deref().unwrap_or("");
        messages.push(Message::tool_result(&step.tool, result));
    }
    messages.push(Message::user(
        "综合以上工具结果，直接回答用户的请求。",
    ));

    let synthesis = provider.chat_with_tools(&messages, &[]).await?;
    add_usage(&mut stats.lock(), &synthesis.usage);

    callback.emit(&EventWithMeta::new(EventType::Answer, &synthesis.content));
    let stats = stats.lock().clone();
    Ok(RunOutcome {
        content: synthesis.content,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use av_providers::scripted::ScriptedProvider;
    use av_providers::{ChatOutcome, Usage};

    struct NamedTool {
        name: String,
        delay_ms: u64,
    }

    #[async_trait::async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn description(&self) -> &str {
            "test tool"
        }
        fn parameters(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        async fn run(&self, _ctx: &ToolContext, _input: &str) -> av_domain::Result<String> {
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            Ok(format!("{} done", self.name))
        }
    }

    fn outcome(content: &str) -> ChatOutcome {
        ChatOutcome {
            content: content.into(),
            tool_calls: vec![],
            usage: Usage::default(),
        }
    }

    #[test]
    fn parse_plan_handles_fences_and_garbage() {
        assert!(parse_plan("no json").is_none());
        assert!(parse_plan("{\"steps\": []}").is_none());
        let steps =
            parse_plan("```json\n{\"steps\":[{\"tool\":\"a\",\"arguments\":{}}]}\n```").unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].tool, "a");
    }

    #[tokio::test]
    async fn executes_waves_in_dependency_order() {
        let plan = r#"{"steps":[
            {"tool":"slow","arguments":{}},
            {"tool":"fast","arguments":{}},
            {"tool":"after","arguments":{},"depends_on":[0,1]}
        ]}"#;
        let provider: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::new(
            "p",
            vec![outcome(plan), outcome("综合结果")],
        ));
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(NamedTool { name: "slow".into(), delay_ms: 50 }),
            Arc::new(NamedTool { name: "fast".into(), delay_ms: 0 }),
            Arc::new(NamedTool { name: "after".into(), delay_ms: 0 }),
        ];

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let cb = SafeCallback::new(Arc::new(move |ev: &EventWithMeta| {
            sink.lock().push(ev.clone());
            Ok(())
        }));

        let result = run_planning(
            &provider,
            &tools,
            &ToolContext::default(),
            &AgentLoopConfig::new("sys", 1),
            "do all three",
            &cb,
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(result.content, "综合结果");
        assert_eq!(result.stats.tool_call_count, 3);
        assert_eq!(result.stats.llm_call_count, 2);

        // "after" must start strictly after both wave-1 results landed.
        let events = events.lock();
        let idx_after_use = events
            .iter()
            .position(|e| {
                e.event_type == EventType::ToolUse
                    && e.meta.as_ref().and_then(|m| m.tool_name.as_deref()) == Some("after")
            })
            .unwrap();
        let wave1_results: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.event_type == EventType::ToolResult)
            .filter(|(_, e)| {
                let name = e.meta.as_ref().and_then(|m| m.tool_name.as_deref());
                name == Some("slow") || name == Some("fast")
            })
            .map(|(i, _)| i)
            .collect();
        assert_eq!(wave1_results.len(), 2);
        assert!(wave1_results.iter().all(|&i| i < idx_after_use));

        // Phases announced in order.
        let phases: Vec<&str> = events
            .iter()
            .filter(|e| e.event_type == EventType::PhaseChange)
            .map(|e| e.content.as_str())
            .collect();
        assert_eq!(phases, vec!["planning", "executing", "synthesis"]);
    }

    #[tokio::test]
    async fn unplannable_content_becomes_the_answer() {
        let provider: Arc<dyn ChatProvider> = Arc::new(ScriptedProvider::new(
            "p",
            vec![outcome("这个请求不需要工具，直接回答。")],
        ));
        let cb = SafeCallback::noop();
        let result = run_planning(
            &provider,
            &[],
            &ToolContext::default(),
            &AgentLoopConfig::new("sys", 1),
            "你好",
            &cb,
            &CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.content, "这个请求不需要工具，直接回答。");
        assert_eq!(result.stats.llm_call_count, 1);
    }

    #[tokio::test]
    async fn dependency_cycle_is_a_validation_error() {
        let plan = r#"{"steps":[
            {"tool":"a","arguments":{},"depends_on":[1]},
            {"tool":"b","arguments":{},"depends_on":[0]}
        ]}"#;
        let provider: Arc<dyn ChatProvider> =
            Arc::new(ScriptedProvider::new("p", vec![outcome(plan)]));
        let cb = SafeCallback::noop();
        let err = run_planning(
            &provider,
            &[],
            &ToolContext::default(),
            &AgentLoopConfig::new("sys", 1),
            "cycle",
            &cb,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
