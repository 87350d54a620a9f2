use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ChatProvider;
use hyperflow_core::types::*;

use super::{read_json, trim_base};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_MODEL: &str = "claude-3-opus-20240229";

/// Anthropic Messages API client.
pub struct AnthropicClient {
    http: Client,
    base_url: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = trim_base(base_url);
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<AnthropicTool>,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}

#[derive(Deserialize, Debug)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

/// System turns are lifted into the top-level `system` field.
fn build_request(
    model: &str,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    tools: &[ToolDefinition],
) -> MessagesRequest {
    let mut system: Vec<String> = Vec::new();
    let mut turns = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system.push(msg.content),
            Role::User | Role::Assistant => turns.push(AnthropicMessage {
                role: msg.role.as_str(),
                content: msg.content,
            }),
        }
    }

    MessagesRequest {
        model: model.to_string(),
        max_tokens,
        temperature,
        system: if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        },
        messages: turns,
        tools: tools
            .iter()
            .map(|t| AnthropicTool {
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
            })
            .collect(),
    }
}

fn into_generation(response: MessagesResponse) -> Generation {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: Some(id),
                name,
                arguments: input,
            }),
            ContentBlock::Other => {}
        }
    }

    Generation {
        text,
        usage: response
            .usage
            .map(|u| Usage {
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
            })
            .unwrap_or_default(),
        tool_calls,
    }
}

impl ChatProvider for AnthropicClient {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
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
            let body = build_request(&self.model, messages, temperature, max_tokens, tools);

            let response = self
                .http
                .post(format!("{}/v1/messages", self.base_url))
                .header("x-api-key", secret)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| HyperflowError::LlmRequest(e.to_string()))?;

            let parsed: MessagesResponse = read_json(response).await?;
            Ok(into_generation(parsed))
        })
    }
}
