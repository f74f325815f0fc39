//! The four classification layers: cache, rule, history, LLM.
//!
//! Layers are tried in order and the first confident result wins. Cache
//! and rule are synchronous and effectively free; history costs one
//! embedding lookup; the LLM layer is the expensive last resort.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use av_providers::embed::{char_frequency_vector, cosine_similarity};
use av_providers::ChatProvider;
use av_domain::message::Message;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A classification result from one layer.
#[derive(Debug, Clone)]
pub struct ClassifyHit {
    pub route: String,
    pub intent: String,
    pub confidence: f64,
    /// Set by the LLM layer when it detects several intents in one input.
    pub multi_intent: bool,
}

/// Lowercase, trim, collapse whitespace runs.
pub fn normalize_input(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer 1: cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Exact-match LRU over normalised inputs.
pub struct CacheLayer {
    capacity: usize,
    entries: Mutex<HashMap<String, (ClassifyHit, u64)>>,
    clock: Mutex<u64>,
}

impl CacheLayer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
            clock: Mutex::new(0),
        }
    }

    pub fn get(&self, input: &str) -> Option<ClassifyHit> {
        let key = normalize_input(input);
        let mut entries = self.entries.lock();
        let tick = {
            let mut clock = self.clock.lock();
            *clock += 1;
            *clock
        };
        let entry = entries.get_mut(&key)?;
        entry.1 = tick;
        Some(entry.0.clone())
    }

    pub fn store(&self, input: &str, hit: ClassifyHit) {
        let key = normalize_input(input);
        let mut entries = self.entries.lock();
        let tick = {
            let mut clock = self.clock.lock();
            *clock += 1;
            *clock
        };
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, (_, used))| *used)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(key, (hit, tick));
    }

    /// Explicit invalidation on conversation scope changes.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer 2: rules
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Rule {
    pattern: Regex,
    route: &'static str,
    intent: &'static str,
}

/// Keyword/regex table with disjoint categories. Fixed confidence 0.9.
pub struct RuleLayer {
    rules: Vec<Rule>,
}

const RULE_CONFIDENCE: f64 = 0.9;

impl Default for RuleLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleLayer {
    pub fn new() -> Self {
        let table: &[(&str, &str, &str)] = &[
            (
                r"(日程|提醒|安排|会议|开会|schedule|remind|meeting|appointment)",
                "schedule",
                "schedule",
            ),
            (
                r"(笔记|备忘|记录|memo|note)",
                "memo",
                "memo_search",
            ),
        ];
        let rules = table
            .iter()
            .map(|(pattern, route, intent)| Rule {
                pattern: Regex::new(&format!("(?i){pattern}")).expect("builtin rule pattern"),
                route,
                intent,
            })
            .collect();
        Self { rules }
    }

    pub fn classify(&self, input: &str) -> Option<ClassifyHit> {
        let normalized = normalize_input(input);
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(&normalized))
            .map(|rule| ClassifyHit {
                route: rule.route.to_owned(),
                intent: rule.intent.to_owned(),
                confidence: RULE_CONFIDENCE,
                multi_intent: false,
            })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer 3: history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Similarity search over recent in-conversation inputs labelled with the
/// route they resolved to. Uses the embedding provider when configured,
/// the deterministic character-frequency fallback otherwise.
pub async fn classify_history(
    input: &str,
    labelled: &[(String, String)],
    embedding_provider: Option<&Arc<dyn ChatProvider>>,
    min_similarity: f64,
) -> Option<ClassifyHit> {
    if labelled.is_empty() {
        return None;
    }

    let vectors: Vec<Vec<f32>> = match embedding_provider {
        Some(provider) => {
            let mut texts: Vec<String> = Vec::with_capacity(labelled.len() + 1);
            texts.push(input.to_owned());
            texts.extend(labelled.iter().map(|(text, _)| text.clone()));
            match provider.embeddings(&texts).await {
                Ok(vectors) if vectors.len() == texts.len() => vectors,
                Ok(_) | Err(_) => {
                    tracing::debug!("embedding provider failed, using fallback vectors");
                    fallback_vectors(input, labelled)
                }
            }
        }
        None => fallback_vectors(input, labelled),
    };

    let (input_vec, rest) = vectors.split_first()?;
    let mut best: Option<(f64, &str)> = None;
    for (vec, (_, route)) in rest.iter().zip(labelled) {
        let similarity = cosine_similarity(input_vec, vec) as f64;
        if best.map(|(s, _)| similarity > s).unwrap_or(true) {
            best = Some((similarity, route));
        }
    }

    let (similarity, route) = best?;
    if similarity < min_similarity {
        return None;
    }
    Some(ClassifyHit {
        route: route.to_owned(),
        intent: "history_similarity".into(),
        confidence: similarity,
        multi_intent: false,
    })
}

fn fallback_vectors(input: &str, labelled: &[(String, String)]) -> Vec<Vec<f32>> {
    let mut vectors = Vec::with_capacity(labelled.len() + 1);
    vectors.push(char_frequency_vector(input));
    vectors.extend(labelled.iter().map(|(text, _)| char_frequency_vector(text)));
    vectors
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Layer 4: LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn classification_prompt(parrot_names: &[String], input: &str) -> String {
    format!(
        "Classify the user request to one assistant. Assistants: {}.\n\
         Respond with pure JSON, no prose:\n\
         {{\"parrot\": \"<name>\", \"intent\": \"<short label>\", \"confidence\": 0.0, \"multi_intent\": false}}\n\
         Examples:\n\
         {{\"parrot\": \"memo\", \"intent\": \"memo_search\", \"confidence\": 0.95, \"multi_intent\": false}} for 搜索我的 Go 笔记\n\
         {{\"parrot\": \"schedule\", \"intent\": \"schedule_add\", \"confidence\": 0.9, \"multi_intent\": false}} for 明天三点开会\n\
         Request: {input}",
        parrot_names.join(", ")
    )
}

/// Few-shot classification against the small intent model.
pub async fn classify_llm(
    provider: &Arc<dyn ChatProvider>,
    parrot_names: &[String],
    input: &str,
    timeout: Duration,
) -> Option<ClassifyHit> {
    let messages = vec![
        Message::system("You are an intent classifier. Output JSON only."),
        Message::user(classification_prompt(parrot_names, input)),
    ];

    let outcome = match tokio::time::timeout(timeout, provider.chat(&messages)).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "llm classification failed");
            return None;
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "llm classification timed out");
            return None;
        }
    };

    parse_llm_classification(&outcome.content)
}

fn parse_llm_classification(content: &str) -> Option<ClassifyHit> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```"))
        .unwrap_or(trimmed);
    let value: serde_json::Value = serde_json::from_str(body.trim()).ok()?;
    Some(ClassifyHit {
        route: value.get("parrot")?.as_str()?.to_owned(),
        intent: value
            .get("intent")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_owned(),
        confidence: value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0),
        multi_intent: value
            .get("multi_intent")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
    })
}
