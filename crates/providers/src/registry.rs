//! Provider registry: constructs and holds every configured LLM backend.
//!
//! At startup the registry reads [`LlmConfig`], instantiates the matching
//! adapter for each configured provider, and records which role names map to
//! which `"provider_id/model_name"` pair. A provider that fails to
//! initialize is skipped rather than aborting startup — it simply won't be
//! reachable by role resolution, which the router surfaces as "not found".

use std::collections::HashMap;
use std::sync::Arc;

use ak_domain::config::{LlmConfig, ProviderKind};

use crate::memory::InMemoryProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    roles: HashMap<String, String>,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        for pc in &config.providers {
            let result: ak_domain::error::Result<Arc<dyn LlmProvider>> = match pc.kind {
                ProviderKind::OpenaiCompat => {
                    OpenAiCompatProvider::from_config(pc).map(|p| Arc::new(p) as Arc<dyn LlmProvider>)
                }
                ProviderKind::InMemory => Ok(Arc::new(InMemoryProvider::with_script(
                    pc.id.clone(),
                    vec![crate::memory::ScriptedTurn::Text("ok".into())],
                ))),
            };

            match result {
                Ok(provider) => {
                    tracing::info!(provider_id = %pc.id, kind = ?pc.kind, "registered LLM provider");
                    providers.insert(pc.id.clone(), provider);
                }
                Err(e) => {
                    tracing::warn!(provider_id = %pc.id, kind = ?pc.kind, error = %e, "failed to initialize LLM provider, skipping");
                }
            }
        }

        let roles = config.roles.iter().map(|(name, cfg)| (name.clone(), cfg.model.clone())).collect();

        Self { providers, roles }
    }

    /// Build a registry directly from already-constructed providers, useful
    /// for wiring the in-memory backend in tests without going through config.
    pub fn new(providers: HashMap<String, Arc<dyn LlmProvider>>, roles: HashMap<String, String>) -> Self {
        Self { providers, roles }
    }

    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(provider_id).cloned()
    }

    pub fn for_role(&self, role: &str) -> Option<Arc<dyn LlmProvider>> {
        let model_spec = self.roles.get(role)?;
        let provider_id = model_spec.split('/').next().unwrap_or(model_spec);
        self.providers.get(provider_id).cloned()
    }

    pub fn model_for_role(&self, role: &str) -> Option<&str> {
        self.roles.get(role).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list_providers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ak_domain::config::{ProviderConfig, RoleConfig};

    fn config() -> LlmConfig {
        let mut roles = HashMap::new();
        roles.insert(
            "planner".to_string(),
            RoleConfig { model: "mem/default".into(), require_tools: false, require_json: false, require_streaming: false, fallbacks: Vec::new() },
        );
        LlmConfig {
            providers: vec![ProviderConfig {
                id: "mem".into(),
                kind: ProviderKind::InMemory,
                base_url: String::new(),
                api_key_env: None,
                default_model: None,
            }],
            roles,
            default_timeout_ms: 1000,
        }
    }

    #[test]
    fn from_config_registers_in_memory_provider() {
        let registry = ProviderRegistry::from_config(&config());
        assert_eq!(registry.len(), 1);
        assert!(registry.get("mem").is_some());
    }

    #[test]
    fn for_role_resolves_provider_by_role_config() {
        let registry = ProviderRegistry::from_config(&config());
        assert!(registry.for_role("planner").is_some());
        assert!(registry.for_role("nonexistent").is_none());
    }

    #[test]
    fn openai_compat_without_api_key_env_still_initializes() {
        let mut cfg = config();
        cfg.providers.push(ProviderConfig {
            id: "local".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "http://localhost:11434/v1".into(),
            api_key_env: None,
            default_model: Some("llama3".into()),
        });
        let registry = ProviderRegistry::from_config(&cfg);
        assert_eq!(registry.len(), 2);
    }
}
