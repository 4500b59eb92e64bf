//! Backend registry keyed by provider

use super::{LlmError, LoggingBackend, ModelBackend, OpenAIBackend, OPENAI_BASE_URL, OPENROUTER_BASE_URL};
use crate::flow::{ConfigError, ModelProvider};
use std::collections::HashMap;
use std::sync::Arc;

/// Configuration for completion providers
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openrouter_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    /// Override for the OpenAI-compatible endpoint
    pub openai_base_url: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            openrouter_api_key: non_empty_env("OPENROUTER_API_KEY"),
            openai_api_key: non_empty_env("OPENAI_API_KEY"),
            openai_base_url: non_empty_env("OPENAI_BASE_URL"),
        }
    }

    /// Key and base URL for the `openai` provider. `OpenRouter` wins when
    /// both keys are present.
    fn openai_endpoint(&self) -> Option<(String, String)> {
        let (key, default_base) = match (&self.openrouter_api_key, &self.openai_api_key) {
            (Some(key), _) => (key.clone(), OPENROUTER_BASE_URL),
            (None, Some(key)) => (key.clone(), OPENAI_BASE_URL),
            (None, None) => return None,
        };
        let base = self
            .openai_base_url
            .clone()
            .unwrap_or_else(|| default_base.to_string());
        Some((key, base))
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Backends available to agents, one per provider
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<ModelProvider, Arc<dyn ModelBackend>>,
}

impl BackendRegistry {
    /// Create an empty registry for testing purposes
    #[cfg(test)]
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut registry = Self::default();

        if let Some((key, base)) = config.openai_endpoint() {
            tracing::info!(base_url = %base, "Registering openai backend");
            registry.insert(Arc::new(OpenAIBackend::new(key, &base)?));
        }

        if !registry.has_backends() {
            tracing::warn!("No completion provider configured; set OPENROUTER_API_KEY or OPENAI_API_KEY");
        }
        Ok(registry)
    }

    /// Register a backend under its own provider, wrapped with logging
    pub fn insert(&mut self, backend: Arc<dyn ModelBackend>) {
        let provider = backend.provider();
        self.backends
            .insert(provider, Arc::new(LoggingBackend::new(backend)));
    }

    pub fn get(&self, provider: ModelProvider) -> Result<Arc<dyn ModelBackend>, ConfigError> {
        self.backends
            .get(&provider)
            .cloned()
            .ok_or(ConfigError::ProviderUnavailable(provider))
    }

    pub fn has_backends(&self) -> bool {
        !self.backends.is_empty()
    }
}
