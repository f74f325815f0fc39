//! The direct executor: one LLM call with native function calling, no
//! iteration. Any tool calls are executed once; their results and one
//! follow-up LLM call produce the final answer.

use parking_lot::Mutex;
use std::collections::HashMap;
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

pub async fn run_direct(
    provider: &Arc<dyn ChatProvider>,
    tools: &[Arc<dyn Tool>],
    tool_ctx: &ToolContext,
    config: &AgentLoopConfig,
    input: &str,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let descriptors: Vec<_> = tools.iter().map(|t| t.descriptor()).collect();
    let by_name: HashMap<&str, &Arc<dyn Tool>> = tools.iter().map(|t| (t.name(), t)).collect();

    let mut messages = vec![
        Message::system(&config.system_prompt),
        Message::user(input),
    ];
    let stats = Mutex::new(AgentStats::default());
    let occurrences = OccurrenceCounter::new();

    callback.emit(&EventWithMeta::new(EventType::Thinking, "正在思考…"));

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let first = provider.chat_with_tools(&messages, &descriptors).await?;
    add_usage(&mut stats.lock(), &first.usage);

    if first.tool_calls.is_empty() {
        callback.emit(&EventWithMeta::new(EventType::Answer, &first.content));
        return Ok(RunOutcome {
            content: first.content,
            stats: stats.into_inner(),
        });
    }

    // One tool round, then one follow-up call for the final answer.
    let mut recorded = first.content.clone();
    for call in &first.tool_calls {
        recorded.push_str(&format!("\n[Tool: {}({})]", call.name, call.arguments_json));
    }
    messages.push(Message::assistant(recorded.trim_start()));

    for call in &first.tool_calls {
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
                match tokio::time::timeout(config.tool_timeout, tool.run(tool_ctx, &call.arguments_json))
                    .await
                {
                    Ok(Ok(output)) => (output, false),
                    Ok(Err(e)) => (format!("Error: {e}"), true),
                    Err(_) => (
                        format!("Error: tool {} timed out", call.name),
                        true,
                    ),
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
    }

    let second = provider.chat_with_tools(&messages, &[]).await?;
    add_usage(&mut stats.lock(), &second.usage);

    callback.emit(&EventWithMeta::new(EventType::Answer, &second.content));
    Ok(RunOutcome {
        content: second.content,
        stats: stats.into_inner(),
    })
}
