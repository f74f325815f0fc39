//! The orchestrator ("amazing" parrot): a planning executor whose tools
//! are the other parrots.
//!
//! Low-confidence or multi-intent requests land here. The orchestrator
//! decomposes the request into per-parrot assignments, runs them, handles
//! `INABILITY_REPORTED:` handoffs by re-routing the failed assignment, and
//! synthesises a single answer.

use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use av_domain::block::AgentStats;
use av_domain::error::{Error, Result};
use av_domain::event::{EventType, EventWithMeta, SafeCallback};
use av_domain::message::Message;

use crate::runtime::agent_loop::RunOutcome;
use crate::runtime::{add_usage, HANDOFF_PREFIX};

use super::{execute_parrot, Parrot, ParrotDeps, ParrotRegistry, ParrotRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Assignment format
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
struct Assignment {
    parrot: String,
    input: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AssignmentPlan {
    #[serde(default)]
    assignments: Vec<Assignment>,
}

fn parse_assignments(content: &str) -> Option<Vec<Assignment>> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed);
    let plan: AssignmentPlan = serde_json::from_str(body.trim()).ok()?;
    if plan.assignments.is_empty() {
        return None;
    }
    Some(plan.assignments)
}

fn decomposition_prompt(registry: &ParrotRegistry, input: &str) -> String {
    let mut catalogue = String::new();
    for parrot in registry.dispatchable() {
        let desc = &parrot.spec.self_description;
        catalogue.push_str(&format!(
            "- {}: {} ({})\n",
            parrot.name(),
            desc.title,
            desc.capabilities.join(", ")
        ));
    }
    format!(
        "You coordinate specialist assistants. Available specialists:\n{catalogue}\
         Split the request into assignments. Respond with pure JSON, no prose:\n\
         {{\"assignments\": [{{\"parrot\": \"<name>\", \"input\": \"<sub request>\"}}]}}\n\
         Request: {input}"
    )
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn run_orchestrator(
    deps: &ParrotDeps,
    registry: &Arc<ParrotRegistry>,
    parrot: &Arc<Parrot>,
    req: &ParrotRequest,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let provider = deps
        .providers
        .for_role("chat")
        .ok_or_else(|| Error::Config("no chat provider configured".into()))?;

    let mut stats = AgentStats::default();

    // ── Decompose ──────────────────────────────────────────────────
    callback.emit(&EventWithMeta::new(EventType::PhaseChange, "planning"));

    let plan_messages = vec![
        Message::system(&parrot.spec.system_prompt),
        Message::user(decomposition_prompt(registry, &req.input)),
    ];
    let planned = provider.chat_with_tools(&plan_messages, &[]).await?;
    add_usage(&mut stats, &planned.usage);

    let Some(assignments) = parse_assignments(&planned.content) else {
        callback.emit(&EventWithMeta::new(EventType::Answer, &planned.content));
        return Ok(RunOutcome {
            content: planned.content,
            stats,
        });
    };

    // ── Execute assignments ────────────────────────────────────────
    callback.emit(&EventWithMeta::new(EventType::PhaseChange, "executing"));

    let mut results: Vec<(String, String)> = Vec::with_capacity(assignments.len());
    for (idx, assignment) in assignments.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let outcome =
            run_assignment(deps, registry, assignment, req, callback, cancel).await?;
        stats.merge(&outcome.stats);

        let content = if let Some(reason) = outcome.content.strip_prefix(HANDOFF_PREFIX) {
            // Handoff: the specialist bowed out; try the next-best parrot.
            callback.emit(&EventWithMeta::new(
                EventType::Status,
                format!("{} 无法处理该请求，正在转交", assignment.parrot),
            ));
            match reroute(deps, registry, assignment, req, callback, cancel).await? {
                Some(rerouted) => {
                    stats.merge(&rerouted.stats);
                    rerouted.content
                }
                None => reason.trim().to_owned(),
            }
        } else {
            outcome.content
        };

        callback.emit(&EventWithMeta::new(
            EventType::Progress,
            format!("{}/{} 项子任务完成", idx + 1, assignments.len()),
        ));
        results.push((assignment.parrot.clone(), content));
    }

    // ── Synthesise ─────────────────────────────────────────────────
    if results.len() == 1 {
        let content = results.into_iter().next().map(|(_, c)| c).unwrap_or_default();
        callback.emit(&EventWithMeta::new(EventType::Answer, &content));
        return Ok(RunOutcome { content, stats });
    }

    callback.emit(&EventWithMeta::new(EventType::PhaseChange, "synthesis"));

    let mut messages = vec![
        Message::system(&parrot.spec.system_prompt),
        Message::user(&req.input),
    ];
    for (name, content) in &results {
        messages.push(Message::tool_result(name, content));
    }
    messages.push(Message::user("综合以上专家结果，给出一个完整回答。"));

    let synthesis = provider.chat_with_tools(&messages, &[]).await?;
    add_usage(&mut stats, &synthesis.usage);

    callback.emit(&EventWithMeta::new(EventType::Answer, &synthesis.content));
    Ok(RunOutcome {
        content: synthesis.content,
        stats,
    })
}

/// Execute one assignment against its parrot. Unknown parrot names become
/// inability reports so the reroute path can pick them up.
async fn run_assignment(
    deps: &ParrotDeps,
    registry: &Arc<ParrotRegistry>,
    assignment: &Assignment,
    req: &ParrotRequest,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let Some(target) = registry.get(&assignment.parrot).filter(|p| p.dispatchable()) else {
        return Ok(RunOutcome {
            content: format!("{HANDOFF_PREFIX} no specialist named '{}'", assignment.parrot),
            stats: AgentStats::default(),
        });
    };

    let sub_req = ParrotRequest {
        input: assignment.input.clone(),
        ..req.clone()
    };

    boxed_execute(deps, registry, &target, sub_req, callback, cancel).await
}

/// Hand the assignment to the first dispatchable parrot that is not the
/// one that reported inability.
async fn reroute(
    deps: &ParrotDeps,
    registry: &Arc<ParrotRegistry>,
    assignment: &Assignment,
    req: &ParrotRequest,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<Option<RunOutcome>> {
    let Some(fallback) = registry
        .dispatchable()
        .into_iter()
        .find(|p| p.name() != assignment.parrot)
    else {
        return Ok(None);
    };

    let sub_req = ParrotRequest {
        input: assignment.input.clone(),
        ..req.clone()
    };
    let outcome = boxed_execute(deps, registry, &fallback, sub_req, callback, cancel).await?;
    Ok(Some(outcome))
}

/// Type-erased recursion point: orchestrator → parrot → (never again the
/// orchestrator, but the compiler cannot see that).
fn boxed_execute<'a>(
    deps: &'a ParrotDeps,
    registry: &'a Arc<ParrotRegistry>,
    parrot: &'a Arc<Parrot>,
    req: ParrotRequest,
    callback: &'a SafeCallback,
    cancel: &'a CancellationToken,
) -> Pin<Box<dyn Future<Output = Result<RunOutcome>> + Send + 'a>> {
    Box::pin(async move { execute_parrot(deps, registry, parrot, &req, callback, cancel).await })
}
