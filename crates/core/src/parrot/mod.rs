//! Parrots: specialist agent bundles and their execution dispatch.
//!
//! A parrot couples a system prompt, a tool list, and a strategy. The
//! strategy set is closed: ReAct, Direct, Planning, CC-backed (geek /
//! evolution), and the orchestrator. Config drives selection at build
//! time; execution dispatches on the sum type.

pub mod cache;
pub mod factory;
pub mod orchestrator;

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use av_domain::block::{AgentStats, Mode};
use av_domain::config::{ParrotSpec, RunnerConfig};
use av_domain::error::{Error, Result};
use av_domain::event::{EventMeta, EventType, EventWithMeta, SafeCallback};
use av_domain::trace::TraceEvent;
use av_providers::{ChatProvider, ProviderRegistry};
use av_runner::runner::ExecuteConfig;
use av_runner::CcRunner;
use av_tools::{ToolContext, ToolRegistry};

use crate::runtime::agent_loop::{run_react_loop, AgentLoopConfig, RunOutcome};
use crate::runtime::direct::run_direct;
use crate::runtime::planning::run_planning;
use cache::ResultCache;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Parrot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Closed execution strategy sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    React,
    Direct,
    Planning,
    CcBacked(Mode),
    Orchestrator,
}

#[derive(Debug)]
pub struct Parrot {
    pub spec: ParrotSpec,
    pub kind: ExecutorKind,
    pub cache: Option<ResultCache>,
}

impl Parrot {
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Whether the orchestrator may dispatch to this parrot.
    pub fn dispatchable(&self) -> bool {
        matches!(
            self.kind,
            ExecutorKind::React | ExecutorKind::Direct | ExecutorKind::Planning
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ParrotRegistry {
    parrots: RwLock<HashMap<String, Arc<Parrot>>>,
}

impl ParrotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, parrot: Parrot) -> Result<()> {
        let name = parrot.name().to_owned();
        let mut parrots = self.parrots.write();
        if parrots.contains_key(&name) {
            return Err(Error::Validation(format!("parrot already registered: {name}")));
        }
        parrots.insert(name, Arc::new(parrot));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Parrot>> {
        self.parrots.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.parrots.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.parrots.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Parrots the orchestrator may hand work to.
    pub fn dispatchable(&self) -> Vec<Arc<Parrot>> {
        let mut list: Vec<Arc<Parrot>> = self
            .parrots
            .read()
            .values()
            .filter(|p| p.dispatchable())
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name().cmp(b.name()));
        list
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared dependencies the executors pull from.
pub struct ParrotDeps {
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub runner: Arc<CcRunner>,
    pub runner_config: RunnerConfig,
}

#[derive(Debug, Clone)]
pub struct ParrotRequest {
    pub user_id: i64,
    pub conversation_id: i64,
    pub input: String,
    pub is_admin: bool,
}

/// Execute one request against a parrot. Dispatches on the strategy sum,
/// wrapping with the optional result cache.
pub async fn execute_parrot(
    deps: &ParrotDeps,
    registry: &Arc<ParrotRegistry>,
    parrot: &Arc<Parrot>,
    req: &ParrotRequest,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    // ── Cache short-circuit ────────────────────────────────────────
    if let Some(cache) = &parrot.cache {
        if let Some(hit) = cache.get(req.user_id, &req.input) {
            TraceEvent::CacheHit {
                parrot: parrot.name().to_owned(),
                fingerprint: cache.fingerprint(req.user_id, &req.input),
            }
            .emit();
            let meta = EventMeta::default().with_extra("method", serde_json::json!("cache"));
            callback.emit(
                &EventWithMeta::new(EventType::Status, "缓存命中").with_meta(meta.clone()),
            );
            callback.emit(&EventWithMeta::new(EventType::Answer, &hit).with_meta(meta));
            return Ok(RunOutcome {
                content: hit,
                stats: AgentStats::default(),
            });
        }
    }

    let outcome = dispatch(deps, registry, parrot, req, callback, cancel).await?;

    if let Some(cache) = &parrot.cache {
        cache.put(req.user_id, &req.input, &outcome.content);
    }
    Ok(outcome)
}

async fn dispatch(
    deps: &ParrotDeps,
    registry: &Arc<ParrotRegistry>,
    parrot: &Arc<Parrot>,
    req: &ParrotRequest,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let tool_ctx = ToolContext {
        user_id: req.user_id,
        conversation_id: req.conversation_id,
    };

    match parrot.kind {
        ExecutorKind::React | ExecutorKind::Direct | ExecutorKind::Planning => {
            let provider = chat_provider(deps)?;
            let tools = deps.tools.resolve_many(&parrot.spec.tools, req.user_id)?;
            let config = AgentLoopConfig::new(&parrot.spec.system_prompt, parrot.spec.max_iterations);
            match parrot.kind {
                ExecutorKind::React => {
                    run_react_loop(&provider, &tools, &tool_ctx, &config, &req.input, callback, cancel)
                        .await
                }
                ExecutorKind::Direct => {
                    run_direct(&provider, &tools, &tool_ctx, &config, &req.input, callback, cancel)
                        .await
                }
                _ => {
                    run_planning(&provider, &tools, &tool_ctx, &config, &req.input, callback, cancel)
                        .await
                }
            }
        }
        ExecutorKind::CcBacked(mode) => run_cc_backed(deps, mode, req, callback, cancel).await,
        ExecutorKind::Orchestrator => {
            orchestrator::run_orchestrator(deps, registry, parrot, req, callback, cancel).await
        }
    }
}

fn chat_provider(deps: &ParrotDeps) -> Result<Arc<dyn ChatProvider>> {
    deps.providers
        .for_role("chat")
        .ok_or_else(|| Error::Config("no chat provider configured".into()))
}

// ── CC-backed execution ────────────────────────────────────────────

async fn run_cc_backed(
    deps: &ParrotDeps,
    mode: Mode,
    req: &ParrotRequest,
    callback: &SafeCallback,
    cancel: &CancellationToken,
) -> Result<RunOutcome> {
    let work_dir = match mode {
        Mode::Evolution => {
            if !req.is_admin {
                return Err(Error::Permission("evolution mode requires admin".into()));
            }
            let gate = &deps.runner_config.evolution_env_gate;
            let enabled = std::env::var(gate).map(|v| v == "1" || v == "true").unwrap_or(false);
            if !enabled {
                return Err(Error::Permission(format!(
                    "evolution mode disabled: set {gate}=1 to enable"
                )));
            }
            deps.runner_config
                .evolution_workdir
                .clone()
                .ok_or_else(|| Error::Config("runner.evolution_workdir not configured".into()))?
        }
        _ => deps.runner_config.user_workdir(req.user_id),
    };

    let config = ExecuteConfig {
        user_id: req.user_id,
        conversation_id: req.conversation_id,
        mode,
        work_dir,
    };

    let outcome = deps
        .runner
        .execute(cancel.clone(), &config, &req.input, callback)
        .await?;

    let mut stats = AgentStats::default();
    if let Some(usage) = &outcome.usage {
        stats.prompt_tokens = usage.prompt_tokens;
        stats.completion_tokens = usage.completion_tokens;
        stats.cache_read_tokens = usage.cache_read_tokens;
        stats.cache_write_tokens = usage.cache_write_tokens;
    }

    Ok(RunOutcome {
        content: outcome.answer,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ParrotSpec {
        av_domain::config::parse_parrot_spec(&format!(
            "name: {name}\ndisplay_name: {name}\nstrategy: react\nsystem_prompt: test\n"
        ))
        .unwrap()
    }

    #[test]
    fn registry_rejects_duplicates() {
        let registry = ParrotRegistry::new();
        registry
            .register(Parrot {
                spec: spec("memo"),
                kind: ExecutorKind::React,
                cache: None,
            })
            .unwrap();
        assert!(registry
            .register(Parrot {
                spec: spec("memo"),
                kind: ExecutorKind::Direct,
                cache: None,
            })
            .is_err());
    }

    #[test]
    fn dispatchable_excludes_cc_and_orchestrator() {
        let registry = ParrotRegistry::new();
        for (name, kind) in [
            ("memo", ExecutorKind::React),
            ("geek", ExecutorKind::CcBacked(Mode::Geek)),
            ("amazing", ExecutorKind::Orchestrator),
        ] {
            registry
                .register(Parrot {
                    spec: spec(name),
                    kind,
                    cache: None,
                })
                .unwrap();
        }
        let names: Vec<String> = registry
            .dispatchable()
            .iter()
            .map(|p| p.name().to_owned())
            .collect();
        assert_eq!(names, vec!["memo"]);
    }
}
