use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use hyperflow_core::error::Result;
use hyperflow_core::types::{ChatMessage, ProviderType};
use hyperflow_keys::ProviderKeyRotator;
use hyperflow_llm::ProviderRegistry;

use super::lenient::{opt_f64, opt_i64, opt_string};
use super::{parse_config, NodeExecutor};
use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LlmConfig {
    #[serde(default, deserialize_with = "opt_string")]
    provider: Option<String>,
    #[serde(default, alias = "model_name", deserialize_with = "opt_string")]
    model_name: Option<String>,
    #[serde(default, deserialize_with = "opt_f64")]
    temperature: Option<f64>,
    #[serde(default, alias = "max_tokens", deserialize_with = "opt_i64")]
    max_tokens: Option<i64>,
    #[serde(default, alias = "system_prompt", deserialize_with = "opt_string")]
    system_prompt: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    prompt: Option<String>,
    #[serde(default, alias = "prompt_template", deserialize_with = "opt_string")]
    prompt_template: Option<String>,
}

/// Single-turn chat completion through the key rotator.
pub struct LlmNode {
    providers: Arc<ProviderRegistry>,
    rotator: Arc<ProviderKeyRotator>,
}

impl LlmNode {
    pub fn new(providers: Arc<ProviderRegistry>, rotator: Arc<ProviderKeyRotator>) -> Self {
        Self { providers, rotator }
    }

    async fn run(&self, config: Value) -> Result<NodeResult> {
        let cfg: LlmConfig = parse_config(NodeType::Llm, config)?;

        let raw_provider = cfg.provider.unwrap_or_default();
        let Ok(provider) = raw_provider.parse::<ProviderType>() else {
            return Ok(NodeResult::failure(format!("Invalid provider: {}", raw_provider)));
        };

        let client = self.providers.get(provider, cfg.model_name.as_deref())?;
        let temperature = cfg
            .temperature
            .map(|t| t as f32)
            .unwrap_or(DEFAULT_TEMPERATURE);
        let max_tokens = cfg
            .max_tokens
            .map(|n| n.clamp(1, u32::MAX as i64) as u32)
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let system = cfg
            .system_prompt
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let prompt = cfg.prompt.or(cfg.prompt_template).unwrap_or_default();
        let messages = vec![ChatMessage::system(system), ChatMessage::user(prompt)];

        debug!(
            provider = %provider,
            model = %client.model(),
            temperature,
            max_tokens,
            "Dispatching LLM node"
        );

        let outcome = self
            .rotator
            .rotate_until_success(provider, |secret, key_id| {
                let client = client.clone();
                let messages = messages.clone();
                async move {
                    let generation = client
                        .generate(&secret, messages, temperature, max_tokens, &[])
                        .await?;
                    Ok((generation, key_id))
                }
            })
            .await;
        let (generation, key_id) = match outcome {
            Ok(found) => found,
            Err(e) if e.is_credential_error() => {
                warn!(provider = %provider, error = %e, "No usable key for LLM node");
                return Ok(NodeResult::failure(e.to_string()));
            }
            Err(e) => return Err(e),
        };

        Ok(NodeResult {
            usage: Some(generation.usage),
            tool_calls: Some(generation.tool_calls),
            used_key_id: Some(key_id),
            ..NodeResult::success(Value::String(generation.text))
        })
    }
}

impl NodeExecutor for LlmNode {
    fn execute<'a>(&'a self, config: Value, _ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(self.run(config))
    }
}
