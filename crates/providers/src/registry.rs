//! Provider registry keyed by id, with role defaults.
//!
//! Roles name the jobs a provider can hold: `chat` (agent loop), `intent`
//! (router classification), `embedding` (history layer + memory), and
//! `summary` (memory generator). Resolution falls back role → chat → any.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::ChatProvider;

#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ChatProvider>>>,
    roles: RwLock<HashMap<String, String>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Replaces any provider with the same id;
    /// registration happens single-threaded at startup.
    pub fn register(&self, provider: Arc<dyn ChatProvider>) {
        let id = provider.provider_id().to_owned();
        self.providers.write().insert(id, provider);
    }

    /// Assign a role (`chat`, `intent`, `embedding`, `summary`) to a
    /// registered provider id.
    pub fn set_role(&self, role: impl Into<String>, provider_id: impl Into<String>) {
        self.roles.write().insert(role.into(), provider_id.into());
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ChatProvider>> {
        self.providers.read().get(id).cloned()
    }

    /// Resolve a provider for a role: role mapping → `chat` role → any.
    pub fn for_role(&self, role: &str) -> Option<Arc<dyn ChatProvider>> {
        let roles = self.roles.read();
        if let Some(id) = roles.get(role) {
            if let Some(p) = self.providers.read().get(id) {
                return Some(p.clone());
            }
        }
        if role != "chat" {
            if let Some(id) = roles.get("chat") {
                if let Some(p) = self.providers.read().get(id) {
                    return Some(p.clone());
                }
            }
        }
        drop(roles);
        self.providers.read().values().next().cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::ScriptedProvider;

    fn provider(id: &str) -> Arc<dyn ChatProvider> {
        Arc::new(ScriptedProvider::new(id, vec![]))
    }

    #[test]
    fn role_resolution_prefers_mapping() {
        let reg = ProviderRegistry::new();
        reg.register(provider("big"));
        reg.register(provider("small"));
        reg.set_role("chat", "big");
        reg.set_role("intent", "small");

        assert_eq!(reg.for_role("intent").unwrap().provider_id(), "small");
        assert_eq!(reg.for_role("chat").unwrap().provider_id(), "big");
    }

    #[test]
    fn unmapped_role_falls_back_to_chat() {
        let reg = ProviderRegistry::new();
        reg.register(provider("big"));
        reg.set_role("chat", "big");
        assert_eq!(reg.for_role("summary").unwrap().provider_id(), "big");
    }

    #[test]
    fn empty_registry_resolves_none() {
        let reg = ProviderRegistry::new();
        assert!(reg.for_role("chat").is_none());
        assert!(reg.is_empty());
    }
}
