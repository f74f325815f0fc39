//! The router: mode overrides, sticky sessions, and the four-layer
//! classifier cascade.
//!
//! Decision order (first match wins): mode override → metadata sticky →
//! in-memory sticky → cache → rule → history → LLM. A multi-intent label
//! or a confidence below the threshold hands the request to the
//! orchestrator instead.

pub mod layers;

use parking_lot::Mutex;
use regex::Regex;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use av_blocks::{ContextRegistry, ConversationContext, RouteMetaStore};
use av_domain::block::Mode;
use av_domain::config::RouterConfig;
use av_domain::error::{Error, Result};
use av_domain::trace::TraceEvent;
use av_providers::ProviderRegistry;

use crate::parrot::ParrotRegistry;
use layers::{CacheLayer, ClassifyHit, RuleLayer};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct RouteDecision {
    pub route: String,
    pub intent: String,
    pub confidence: f64,
    /// Which layer decided: mode_override, metadata_sticky, memory_sticky,
    /// cache, rule, history, llm, orchestration.
    pub method: String,
    pub needs_orchestration: bool,
}

/// Per-request routing inputs beyond the text itself.
#[derive(Debug, Clone, Default)]
pub struct RouteFlags {
    pub mode: Mode,
    /// Explicit agent selection (non-auto) from the caller.
    pub requested_agent: Option<String>,
    pub is_admin: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Short confirmations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Inputs that merely confirm or continue: no new entities, just assent.
fn confirmation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^(好的|好呀|好|嗯|行|可以|继续吧|继续|ok|okay|yes|y|是的|是|对的|对)[\s。！!~？?．.]*$",
        )
        .expect("confirmation pattern")
    })
}

pub fn is_short_confirmation(input: &str, max_chars: usize) -> bool {
    let trimmed = input.trim();
    trimmed.chars().count() <= max_chars && confirmation_regex().is_match(trimmed)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct Router {
    config: RouterConfig,
    providers: Arc<ProviderRegistry>,
    route_meta: Arc<RouteMetaStore>,
    parrots: Arc<ParrotRegistry>,
    cache: CacheLayer,
    rules: RuleLayer,
    intent_timeout: Duration,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        intent_timeout: Duration,
        providers: Arc<ProviderRegistry>,
        route_meta: Arc<RouteMetaStore>,
        parrots: Arc<ParrotRegistry>,
    ) -> Self {
        let cache = CacheLayer::new(config.cache_capacity);
        Self {
            config,
            providers,
            route_meta,
            parrots,
            cache,
            rules: RuleLayer::new(),
            intent_timeout,
        }
    }

    /// Resolve a request to a parrot.
    pub async fn route(
        &self,
        input: &str,
        conversation_id: i64,
        ctx: &Arc<Mutex<ConversationContext>>,
        flags: &RouteFlags,
    ) -> Result<RouteDecision> {
        let decision = self
            .decide(input, conversation_id, ctx, flags)
            .await?;

        TraceEvent::RouteDecided {
            conversation_id,
            route: decision.route.clone(),
            method: decision.method.clone(),
            confidence: decision.confidence,
            needs_orchestration: decision.needs_orchestration,
        }
        .emit();

        // Persist routing state after a successful non-orchestrated route.
        if !decision.needs_orchestration {
            self.route_meta.record_route(
                conversation_id,
                &decision.route,
                &decision.intent,
                decision.confidence,
                Duration::from_secs(self.config.sticky_window_secs),
            );
            let mut ctx = ctx.lock();
            ctx.record_route(&decision.route, &decision.intent, decision.confidence);
            ctx.push_labelled_input(input, &decision.route);
        }

        Ok(decision)
    }

    async fn decide(
        &self,
        input: &str,
        conversation_id: i64,
        ctx: &Arc<Mutex<ConversationContext>>,
        flags: &RouteFlags,
    ) -> Result<RouteDecision> {
        // ── 1. Mode override (strictly highest) ────────────────────
        match flags.mode {
            Mode::Evolution => {
                if !flags.is_admin {
                    return Err(Error::Permission("evolution mode requires admin".into()));
                }
                return Ok(decided("evolution", "evolution", 1.0, "mode_override"));
            }
            Mode::Geek => {
                return Ok(decided("geek", "code_execution", 1.0, "mode_override"));
            }
            Mode::Normal | Mode::Auto => {}
        }
        if let Some(agent) = &flags.requested_agent {
            if !self.parrots.contains(agent) {
                return Err(Error::Validation(format!("unknown agent: {agent}")));
            }
            return Ok(decided(agent, "explicit", 1.0, "mode_override"));
        }

        let short_confirmation =
            is_short_confirmation(input, self.config.short_confirmation_max_chars);

        // ── 2. Metadata sticky ─────────────────────────────────────
        if self.config.metadata_sticky_enabled && conversation_id > 0 && short_confirmation {
            if let Some(meta) = self.route_meta.get(conversation_id) {
                if meta.is_sticky_valid() {
                    return Ok(decided(
                        &meta.last_agent,
                        &meta.last_intent,
                        meta.last_intent_confidence,
                        "metadata_sticky",
                    ));
                }
            }
        }

        // ── 3. In-memory sticky ────────────────────────────────────
        if short_confirmation {
            let sticky = {
                let ctx = ctx.lock();
                match (&ctx.last_agent, &ctx.last_intent) {
                    (Some(agent), Some(intent))
                        if ctx.last_intent_confidence
                            >= self.config.memory_sticky_min_confidence
                            && ctx.turns_since_route == 1 =>
                    {
                        Some((agent.clone(), intent.clone(), ctx.last_intent_confidence))
                    }
                    _ => None,
                }
            };
            if let Some((agent, intent, confidence)) = sticky {
                return Ok(decided(&agent, &intent, confidence, "memory_sticky"));
            }
        }

        // ── 4. Four-layer classifier ───────────────────────────────
        let hit = self.classify(input, ctx).await;

        match hit {
            Some((hit, method)) if self.accepts(&hit) => {
                if method != "cache" {
                    self.cache.store(input, hit.clone());
                }
                Ok(RouteDecision {
                    route: hit.route,
                    intent: hit.intent,
                    confidence: hit.confidence,
                    method: method.to_owned(),
                    needs_orchestration: false,
                })
            }
            // ── 5. Orchestration trigger ───────────────────────────
            Some((hit, _)) => Ok(RouteDecision {
                route: "amazing".into(),
                intent: hit.intent,
                confidence: hit.confidence,
                method: "orchestration".into(),
                needs_orchestration: true,
            }),
            None => Ok(RouteDecision {
                route: "amazing".into(),
                intent: "unclassified".into(),
                confidence: 0.0,
                method: "orchestration".into(),
                needs_orchestration: true,
            }),
        }
    }

    /// A classification is accepted when the target exists, confidence
    /// clears the threshold, and it is not a multi-intent label.
    fn accepts(&self, hit: &ClassifyHit) -> bool {
        !hit.multi_intent
            && hit.confidence >= self.config.confidence_threshold
            && self.parrots.contains(&hit.route)
    }

    async fn classify(
        &self,
        input: &str,
        ctx: &Arc<Mutex<ConversationContext>>,
    ) -> Option<(ClassifyHit, &'static str)> {
        // Cache: ~0 ms.
        if let Some(hit) = self.cache.get(input) {
            return Some((hit, "cache"));
        }

        // Rules: ~0 ms.
        if let Some(hit) = self.rules.classify(input) {
            return Some((hit, "rule"));
        }

        // History: one embedding lookup.
        let labelled: Vec<(String, String)> =
            ctx.lock().labelled_inputs().cloned().collect();
        let embedding_provider = self.providers.for_role("embedding");
        if let Some(hit) = layers::classify_history(
            input,
            &labelled,
            embedding_provider.as_ref(),
            self.config.history_min_similarity,
        )
        .await
        {
            return Some((hit, "history"));
        }

        // LLM: the expensive last resort.
        let intent_provider = self.providers.for_role("intent")?;
        let names = self.parrots.names();
        layers::classify_llm(&intent_provider, &names, input, self.intent_timeout)
            .await
            .map(|hit| (hit, "llm"))
    }

    /// Conversation scope change: clear sticky metadata and the result
    /// cache entry space for this conversation.
    pub fn reset_conversation(&self, conversation_id: i64, contexts: &ContextRegistry) {
        self.route_meta.clear(conversation_id);
        contexts.remove(conversation_id);
        self.cache.clear();
    }
}

fn decided(route: &str, intent: &str, confidence: f64, method: &str) -> RouteDecision {
    RouteDecision {
        route: route.to_owned(),
        intent: intent.to_owned(),
        confidence,
        method: method.to_owned(),
        needs_orchestration: false,
    }
}
