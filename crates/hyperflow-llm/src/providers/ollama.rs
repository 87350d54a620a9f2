use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ChatProvider;
use hyperflow_core::types::*;

use super::openai::{convert_messages, convert_tools, OaiMessage, OaiTool};
use super::{read_json, trim_base};

const OLLAMA_API_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3";

/// Ollama native chat client.
///
/// Local servers need no credential; a non-empty secret is still sent as a
/// bearer token for deployments behind an authenticating proxy.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: OLLAMA_API_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = trim_base(base_url);
        self
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<OaiMessage>,
    stream: bool,
    options: OllamaOptions,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize, Debug)]
struct OllamaResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize, Debug)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<OllamaToolCall>,
}

#[derive(Deserialize, Debug)]
struct OllamaToolCall {
    function: OllamaFunction,
}

#[derive(Deserialize, Debug)]
struct OllamaFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

fn into_generation(response: OllamaResponse) -> Generation {
    Generation {
        text: response.message.content,
        usage: Usage {
            input_tokens: response.prompt_eval_count,
            output_tokens: response.eval_count,
        },
        tool_calls: response
            .message
            .tool_calls
            .into_iter()
            .map(|tc| ToolCall {
                id: None,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect(),
    }
}

impl ChatProvider for OllamaClient {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn generate<'a>(
        &'a self,
        secret: &'a str,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Generation>> {
        Box::pin(async move {
            let body = OllamaRequest {
                model: self.model.clone(),
                messages: convert_messages(messages),
                stream: false,
                options: OllamaOptions {
                    temperature,
                    num_predict: max_tokens,
                },
                tools: convert_tools(tools),
            };

            let mut req = self
                .http
                .post(format!("{}/api/chat", self.base_url))
                .json(&body);
            if !secret.is_empty() {
                req = req.bearer_auth(secret);
            }

            let response = req
                .send()
                .await
                .map_err(|e| HyperflowError::LlmRequest(e.to_string()))?;

            let parsed: OllamaResponse = read_json(response).await?;
            Ok(into_generation(parsed))
        })
    }
}
