//! Process-wide tool registry.
//!
//! Two parallel stores: direct instances (safe to share across requests)
//! and per-user factories for tools that must bind to a user. Mutation is
//! expected only at startup or through the admin surface; lookups are
//! read-mostly behind an RwLock.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use av_domain::error::{Error, Result};
use av_domain::message::ToolDescriptor;

use crate::{Tool, ToolCategory};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type MakeFn = dyn Fn(i64) -> Arc<dyn Tool> + Send + Sync;

/// A registered factory for user-bound tools.
pub struct ToolFactory {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub tags: Vec<String>,
    make: Arc<MakeFn>,
}

impl ToolFactory {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        category: ToolCategory,
        tags: Vec<String>,
        make: impl Fn(i64) -> Arc<dyn Tool> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            category,
            tags,
            make: Arc::new(make),
        }
    }

    pub fn instantiate(&self, user_id: i64) -> Arc<dyn Tool> {
        (self.make)(user_id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Catalogue entry describing one registered tool (direct or factory).
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub tags: Vec<String>,
    pub user_bound: bool,
}

#[derive(Default)]
pub struct ToolRegistry {
    direct: RwLock<HashMap<String, Arc<dyn Tool>>>,
    factories: RwLock<HashMap<String, Arc<ToolFactory>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── registration ───────────────────────────────────────────────

    /// Register a shared tool instance. Duplicate names fail, across both
    /// stores.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_owned();
        self.check_free(&name)?;
        self.direct.write().insert(name, tool);
        Ok(())
    }

    /// Register a per-user factory. Duplicate names fail, across both
    /// stores.
    pub fn register_factory(&self, factory: ToolFactory) -> Result<()> {
        self.check_free(&factory.name)?;
        self.factories
            .write()
            .insert(factory.name.clone(), Arc::new(factory));
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Result<()> {
        if self.direct.write().remove(name).is_some() {
            return Ok(());
        }
        if self.factories.write().remove(name).is_some() {
            return Ok(());
        }
        Err(Error::Validation(format!("tool not registered: {name}")))
    }

    fn check_free(&self, name: &str) -> Result<()> {
        if self.direct.read().contains_key(name) || self.factories.read().contains_key(name) {
            return Err(Error::Validation(format!(
                "tool already registered: {name}"
            )));
        }
        Ok(())
    }

    // ── lookup ─────────────────────────────────────────────────────

    /// Whether a name resolves to anything (direct or factory).
    pub fn contains(&self, name: &str) -> bool {
        self.direct.read().contains_key(name) || self.factories.read().contains_key(name)
    }

    /// Get a shared instance. Factories require a user; use
    /// [`Self::resolve_for_user`].
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.direct.read().get(name).cloned()
    }

    /// Startup wiring only: panics when the tool is missing.
    pub fn must_get(&self, name: &str) -> Arc<dyn Tool> {
        self.get(name)
            .unwrap_or_else(|| panic!("required tool not registered: {name}"))
    }

    /// Resolve a tool for a user: direct instances win, factories are
    /// instantiated per call.
    pub fn resolve_for_user(&self, name: &str, user_id: i64) -> Option<Arc<dyn Tool>> {
        if let Some(t) = self.direct.read().get(name) {
            return Some(t.clone());
        }
        self.factories
            .read()
            .get(name)
            .map(|f| f.instantiate(user_id))
    }

    /// Resolve several tools for a user, erroring on the first unknown name.
    pub fn resolve_many(&self, names: &[String], user_id: i64) -> Result<Vec<Arc<dyn Tool>>> {
        names
            .iter()
            .map(|n| {
                self.resolve_for_user(n, user_id)
                    .ok_or_else(|| Error::Validation(format!("unknown tool: {n}")))
            })
            .collect()
    }

    // ── listing ────────────────────────────────────────────────────

    fn infos(&self) -> Vec<ToolInfo> {
        let mut out: Vec<ToolInfo> = self
            .direct
            .read()
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                category: t.category(),
                tags: t.tags().iter().map(|s| (*s).to_owned()).collect(),
                user_bound: false,
            })
            .collect();
        out.extend(self.factories.read().values().map(|f| ToolInfo {
            name: f.name.clone(),
            description: f.description.clone(),
            category: f.category,
            tags: f.tags.clone(),
            user_bound: true,
        }));
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub fn list(&self) -> Vec<String> {
        self.infos().into_iter().map(|i| i.name).collect()
    }

    pub fn list_by_category(&self, category: ToolCategory) -> Vec<String> {
        self.infos()
            .into_iter()
            .filter(|i| i.category == category)
            .map(|i| i.name)
            .collect()
    }

    /// Tools carrying all of the given tags.
    pub fn list_with_tags(&self, tags: &[&str]) -> Vec<String> {
        self.infos()
            .into_iter()
            .filter(|i| tags.iter().all(|t| i.tags.iter().any(|have| have == t)))
            .map(|i| i.name)
            .collect()
    }

    /// Descriptors for the named tools, for passing to the LLM.
    pub fn descriptors_for_user(&self, names: &[String], user_id: i64) -> Result<Vec<ToolDescriptor>> {
        Ok(self
            .resolve_many(names, user_id)?
            .iter()
            .map(|t| t.descriptor())
            .collect())
    }

    /// Human-readable catalogue, grouped by category.
    pub fn describe(&self) -> String {
        let infos = self.infos();
        let mut out = String::new();
        for category in ToolCategory::all() {
            let in_cat: Vec<&ToolInfo> =
                infos.iter().filter(|i| i.category == category).collect();
            if in_cat.is_empty() {
                continue;
            }
            out.push_str(&format!("## {}\n", category.as_str()));
            for info in in_cat {
                let bound = if info.user_bound { " (per-user)" } else { "" };
                out.push_str(&format!("- {}{}: {}\n", info.name, bound, info.description));
            }
        }
        out
    }
}
