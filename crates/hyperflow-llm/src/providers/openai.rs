use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ChatProvider;
use hyperflow_core::types::*;

use super::{parse_arguments, read_json, trim_base};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// OpenAI chat completions client.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: OPENAI_API_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = trim_base(base_url);
        self
    }
}

// Request types
#[derive(Serialize)]
pub(crate) struct ChatRequest {
    pub(crate) model: String,
    pub(crate) messages: Vec<OaiMessage>,
    pub(crate) max_tokens: u32,
    pub(crate) temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) tools: Vec<OaiTool>,
}

#[derive(Serialize)]
pub(crate) struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
pub(crate) struct OaiTool {
    r#type: &'static str,
    function: OaiToolDef,
}

#[derive(Serialize)]
pub(crate) struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

#[derive(Deserialize, Debug)]
struct OaiToolCall {
    #[serde(default)]
    id: Option<String>,
    function: OaiFunction,
}

#[derive(Deserialize, Debug)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize, Debug)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

pub(crate) fn convert_messages(messages: Vec<ChatMessage>) -> Vec<OaiMessage> {
    messages
        .into_iter()
        .map(|m| OaiMessage {
            role: m.role.as_str(),
            content: m.content,
        })
        .collect()
}

pub(crate) fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function",
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

pub(crate) fn into_generation(response: ChatResponse) -> Result<Generation> {
    let usage = response
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| HyperflowError::LlmParse("response contained no choices".into()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: parse_arguments(&tc.function.arguments),
        })
        .collect();

    Ok(Generation {
        text: choice.message.content.unwrap_or_default(),
        usage,
        tool_calls,
    })
}

impl ChatProvider for OpenAiClient {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAi
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
            let body = ChatRequest {
                model: self.model.clone(),
                messages: convert_messages(messages),
                max_tokens,
                temperature,
                tools: convert_tools(tools),
            };

            let response = self
                .http
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(secret)
                .json(&body)
                .send()
                .await
                .map_err(|e| HyperflowError::LlmRequest(e.to_string()))?;

            into_generation(read_json(response).await?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_shape() {
        let body = ChatRequest {
            model: "gpt-4o".into(),
            messages: convert_messages(vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("hi"),
            ]),
            max_tokens: 512,
            temperature: 0.5,
            tools: vec![],
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["max_tokens"], 512);
        assert!(value.get("tools").is_none());
    }

    #[test]
    fn test_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        });
        let response: ChatResponse = serde_json::from_value(raw).unwrap();
        let gen = into_generation(response).unwrap();

        assert_eq!(gen.text, "");
        assert_eq!(gen.usage.total(), 15);
        assert_eq!(gen.tool_calls[0].name, "lookup");
        assert_eq!(gen.tool_calls[0].arguments, json!({"q": "rust"}));
    }

    #[test]
    fn test_empty_choices_is_parse_error() {
        let response: ChatResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            into_generation(response),
            Err(HyperflowError::LlmParse(_))
        ));
    }
}
