use std::collections::HashMap;
use std::sync::Arc;

use hyperflow_core::config::ProvidersConfig;
use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ChatProvider;
use hyperflow_core::types::ProviderType;

use crate::providers::{anthropic, gemini, ollama, openai};

/// Builds a client for a requested model (or the provider default on `None`).
pub type ProviderFactory = Box<dyn Fn(Option<&str>) -> Arc<dyn ChatProvider> + Send + Sync>;

/// Explicit provider-type → client factory table, built once at startup.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: HashMap<ProviderType, ProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in HTTP clients, honoring configured
    /// base URLs and default models.
    pub fn with_defaults(config: &ProvidersConfig) -> Self {
        let mut registry = Self::new();

        for provider in ProviderType::ALL {
            let settings = config.settings(provider);
            let base_url = settings.base_url.clone();
            let default_model = settings.default_model.clone();

            let factory: ProviderFactory = Box::new(move |model: Option<&str>| {
                let model = model
                    .map(str::to_string)
                    .or_else(|| default_model.clone());
                build_client(provider, model, base_url.as_deref())
            });
            registry.register(provider, factory);
        }

        registry
    }

    pub fn register(&mut self, provider: ProviderType, factory: ProviderFactory) {
        self.factories.insert(provider, factory);
    }

    /// Resolve a client for `(provider, model_name)`.
    pub fn get(&self, provider: ProviderType, model_name: Option<&str>) -> Result<Arc<dyn ChatProvider>> {
        let factory = self
            .factories
            .get(&provider)
            .ok_or_else(|| HyperflowError::UnsupportedProvider(provider.to_string()))?;
        let model_name = model_name.map(str::trim).filter(|m| !m.is_empty());
        Ok(factory(model_name))
    }

    pub fn providers(&self) -> Vec<ProviderType> {
        let mut list: Vec<_> = self.factories.keys().copied().collect();
        list.sort();
        list
    }
}

fn build_client(
    provider: ProviderType,
    model: Option<String>,
    base_url: Option<&str>,
) -> Arc<dyn ChatProvider> {
    match provider {
        ProviderType::OpenAi => {
            let mut client =
                openai::OpenAiClient::new(model.unwrap_or_else(|| openai::DEFAULT_MODEL.into()));
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderType::Anthropic => {
            let mut client = anthropic::AnthropicClient::new(
                model.unwrap_or_else(|| anthropic::DEFAULT_MODEL.into()),
            );
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderType::Gemini => {
            let mut client =
                gemini::GeminiClient::new(model.unwrap_or_else(|| gemini::DEFAULT_MODEL.into()));
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
        ProviderType::Ollama => {
            let mut client =
                ollama::OllamaClient::new(model.unwrap_or_else(|| ollama::DEFAULT_MODEL.into()));
            if let Some(url) = base_url {
                client = client.with_base_url(url);
            }
            Arc::new(client)
        }
    }
}
