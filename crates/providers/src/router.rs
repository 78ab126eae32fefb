//! Capability-driven LLM router.
//!
//! The router selects a provider for a role (e.g. "planner", "summarizer")
//! and falls back through the role's configured fallback chain when the
//! primary model times out or returns a retriable provider error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ak_domain::config::{LlmConfig, RoleConfig};
use ak_domain::error::{Error, Result};

use crate::registry::ProviderRegistry;
use crate::traits::{ChatRequest, ChatResponse, LlmProvider};
use ak_domain::stream::{BoxStream, StreamEvent};

pub struct LlmRouter {
    registry: ProviderRegistry,
    role_configs: HashMap<String, RoleConfig>,
    default_timeout_ms: u64,
}

impl LlmRouter {
    pub fn from_config(llm_config: &LlmConfig) -> Result<Self> {
        let registry = ProviderRegistry::from_config(llm_config);
        Ok(Self::new(registry, llm_config.roles.clone(), llm_config.default_timeout_ms))
    }

    pub fn new(registry: ProviderRegistry, role_configs: HashMap<String, RoleConfig>, default_timeout_ms: u64) -> Self {
        Self { registry, role_configs, default_timeout_ms }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Send a chat request for a role: resolve its primary model, validate
    /// capabilities, send, and on timeout/5xx-class failure walk the
    /// fallback chain in order.
    pub async fn chat_for_role(&self, role: &str, mut req: ChatRequest) -> Result<ChatResponse> {
        let role_cfg = self
            .role_configs
            .get(role)
            .ok_or_else(|| Error::Config(format!("no role config for '{role}'")))?;

        let (provider_id, model_name) = resolve_model(&role_cfg.model);
        if let Some(provider) = self.registry.get(provider_id) {
            if Self::check_capabilities(&provider, role_cfg) {
                req.model = Some(model_name.to_string());
                let result = self.try_chat(&provider, req.clone()).await;
                match &result {
                    Ok(_) => return result,
                    Err(e) if Self::is_retriable(e) => {
                        tracing::warn!(provider = %provider_id, model = %model_name, error = %e, "primary model failed, trying fallbacks");
                    }
                    Err(_) => return result,
                }
            } else {
                tracing::warn!(provider = %provider_id, model = %model_name, "primary model does not satisfy required capabilities, trying fallbacks");
            }
        } else {
            tracing::warn!(provider = %provider_id, "primary provider not found in registry, trying fallbacks");
        }

        for fallback in &role_cfg.fallbacks {
            let (fb_provider_id, fb_model_name) = resolve_model(&fallback.model);
            let fb_provider = match self.registry.get(fb_provider_id) {
                Some(p) => p,
                None => {
                    tracing::warn!(provider = %fb_provider_id, "fallback provider not found, skipping");
                    continue;
                }
            };

            let cap = fb_provider.capabilities();
            if fallback.require_tools && cap.supports_tools == ak_domain::capability::ToolSupport::None {
                continue;
            }
            if fallback.require_json && !cap.supports_json_mode {
                continue;
            }

            req.model = Some(fb_model_name.to_string());
            let result = self.try_chat(&fb_provider, req.clone()).await;
            match &result {
                Ok(_) => return result,
                Err(e) if Self::is_retriable(e) => {
                    tracing::warn!(provider = %fb_provider_id, model = %fb_model_name, error = %e, "fallback model failed, trying next");
                    continue;
                }
                Err(_) => return result,
            }
        }

        Err(Error::Provider {
            provider: "router".into(),
            message: format!("all models for role '{role}' failed or were unavailable"),
        })
    }

    /// Streaming counterpart to [`chat_for_role`](Self::chat_for_role).
    ///
    /// Fallback only covers *establishing* the stream — once the primary
    /// provider starts yielding chunks, switching providers mid-stream would
    /// mean discarding partial output the caller may already have forwarded,
    /// so errors surfaced by the stream itself are the caller's to handle.
    pub async fn chat_stream_for_role(&self, role: &str, mut req: ChatRequest) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let role_cfg = self
            .role_configs
            .get(role)
            .ok_or_else(|| Error::Config(format!("no role config for '{role}'")))?;

        let (provider_id, model_name) = resolve_model(&role_cfg.model);
        if let Some(provider) = self.registry.get(provider_id) {
            if Self::check_capabilities(&provider, role_cfg) {
                req.model = Some(model_name.to_string());
                match provider.chat_stream(req.clone()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) if Self::is_retriable(&e) => {
                        tracing::warn!(provider = %provider_id, model = %model_name, error = %e, "primary model failed to start streaming, trying fallbacks");
                    }
                    Err(e) => return Err(e),
                }
            } else {
                tracing::warn!(provider = %provider_id, model = %model_name, "primary model does not satisfy required capabilities, trying fallbacks");
            }
        } else {
            tracing::warn!(provider = %provider_id, "primary provider not found in registry, trying fallbacks");
        }

        for fallback in &role_cfg.fallbacks {
            let (fb_provider_id, fb_model_name) = resolve_model(&fallback.model);
            let fb_provider = match self.registry.get(fb_provider_id) {
                Some(p) => p,
                None => {
                    tracing::warn!(provider = %fb_provider_id, "fallback provider not found, skipping");
                    continue;
                }
            };

            let cap = fb_provider.capabilities();
            if fallback.require_tools && cap.supports_tools == ak_domain::capability::ToolSupport::None {
                continue;
            }
            if fallback.require_json && !cap.supports_json_mode {
                continue;
            }

            req.model = Some(fb_model_name.to_string());
            match fb_provider.chat_stream(req.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) if Self::is_retriable(&e) => {
                    tracing::warn!(provider = %fb_provider_id, model = %fb_model_name, error = %e, "fallback model failed to start streaming, trying next");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::Provider {
            provider: "router".into(),
            message: format!("all models for role '{role}' failed or were unavailable"),
        })
    }

    async fn try_chat(&self, provider: &Arc<dyn LlmProvider>, req: ChatRequest) -> Result<ChatResponse> {
        let timeout = std::time::Duration::from_millis(self.default_timeout_ms);
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, provider.chat(req)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "provider '{}' timed out after {}ms",
                provider.provider_id(),
                self.default_timeout_ms
            ))),
        };
        tracing::debug!(provider = %provider.provider_id(), duration_ms = start.elapsed().as_millis() as u64, ok = result.is_ok(), "chat_for_role attempt");
        result
    }

    fn check_capabilities(provider: &Arc<dyn LlmProvider>, role_cfg: &RoleConfig) -> bool {
        let cap = provider.capabilities();
        if role_cfg.require_tools && cap.supports_tools == ak_domain::capability::ToolSupport::None {
            return false;
        }
        if role_cfg.require_json && !cap.supports_json_mode {
            return false;
        }
        if role_cfg.require_streaming && !cap.supports_streaming {
            return false;
        }
        true
    }

    fn is_retriable(err: &Error) -> bool {
        match err {
            Error::Timeout(_) => true,
            Error::Http(_) => true,
            Error::Provider { message, .. } => {
                message.contains("HTTP 5") || message.contains("HTTP 500") || message.contains("HTTP 502") || message.contains("HTTP 503") || message.contains("HTTP 504")
            }
            _ => false,
        }
    }
}

/// Split a `"provider_id/model_name"` string into its two components.
pub fn resolve_model(model_str: &str) -> (&str, &str) {
    match model_str.split_once('/') {
        Some((provider, model)) => (provider, model),
        None => (model_str, ""),
    }
}
