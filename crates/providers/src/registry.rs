//! Provider registry.
//!
//! Constructs every adapter whose API key is present at startup.
//! Missing keys skip the provider rather than aborting the daemon —
//! only work that needs an LLM fails, and it fails with a config error
//! naming the variable.

use std::collections::HashMap;
use std::sync::Arc;

use ami_domain::config::LlmConfig;
use ami_domain::error::{Error, Result};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::traits::LlmProvider;

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    default_provider: String,
}

impl ProviderRegistry {
    /// A registry with no providers (tests and degraded startup).
    pub fn empty(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Instantiate all providers whose credentials resolve.
    pub fn from_config(config: &LlmConfig) -> Self {
        let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

        match AnthropicProvider::from_config(config) {
            Ok(p) => {
                tracing::info!("registered LLM provider: anthropic");
                providers.insert("anthropic".into(), Arc::new(p));
            }
            Err(e) => tracing::info!(error = %e, "anthropic provider not configured, skipping"),
        }

        match OpenAiCompatProvider::from_config(config) {
            Ok(p) => {
                tracing::info!("registered LLM provider: openai");
                providers.insert("openai".into(), Arc::new(p));
            }
            Err(e) => tracing::info!(error = %e, "openai provider not configured, skipping"),
        }

        Self {
            providers,
            default_provider: config.default_provider.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn LlmProvider>> {
        self.providers.get(id).cloned()
    }

    /// The configured default, falling back to any available provider.
    pub fn default_provider(&self) -> Result<Arc<dyn LlmProvider>> {
        if let Some(p) = self.providers.get(&self.default_provider) {
            return Ok(p.clone());
        }
        self.providers.values().next().cloned().ok_or_else(|| {
            Error::Config(
                "no LLM provider configured: set ANTHROPIC_API_KEY or OPENAI_API_KEY".into(),
            )
        })
    }

    /// Register a pre-built provider (tests and embedded use).
    pub fn insert(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }
}
