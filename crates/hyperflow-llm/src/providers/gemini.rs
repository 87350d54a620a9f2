use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::ChatProvider;
use hyperflow_core::types::*;

use super::{read_json, trim_base};

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-1.5-pro-latest";

/// Google Gemini native API client.
pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: GEMINI_API_URL.to_string(),
            model: model.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = trim_base(base_url);
        self
    }
}

// ── Request types ────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiToolDecl>,
    generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFnCall,
    },
}

#[derive(Serialize, Deserialize, Debug)]
struct GeminiFnCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiToolDecl {
    function_declarations: Vec<GeminiFnDecl>,
}

#[derive(Serialize)]
struct GeminiFnDecl {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

// ── Response types ───────────────────────────────────────────────

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Deserialize, Debug)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

/// Split system turns into `systemInstruction`; assistant turns become `model`.
fn build_request(
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    tools: &[ToolDefinition],
) -> GenerateRequest {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(GeminiPart::Text { text: msg.content }),
            Role::User | Role::Assistant => {
                let role = if msg.role == Role::User { "user" } else { "model" };
                contents.push(GeminiContent {
                    role: Some(role.to_string()),
                    parts: vec![GeminiPart::Text { text: msg.content }],
                });
            }
        }
    }

    let tools = if tools.is_empty() {
        vec![]
    } else {
        vec![GeminiToolDecl {
            function_declarations: tools
                .iter()
                .map(|t| GeminiFnDecl {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                })
                .collect(),
        }]
    };

    GenerateRequest {
        contents,
        system_instruction: if system_parts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: system_parts,
            })
        },
        tools,
        generation_config: GenerationConfig {
            max_output_tokens: max_tokens,
            temperature,
        },
    }
}

fn into_generation(response: GenerateResponse) -> Result<Generation> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| HyperflowError::LlmParse("response contained no candidates".into()))?;

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
        match part {
            GeminiPart::Text { text: t } => text.push_str(&t),
            GeminiPart::FunctionCall { function_call } => tool_calls.push(ToolCall {
                id: None,
                name: function_call.name,
                arguments: function_call.args,
            }),
        }
    }

    Ok(Generation {
        text,
        usage: response
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default(),
        tool_calls,
    })
}

impl ChatProvider for GeminiClient {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
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
            let body = build_request(messages, temperature, max_tokens, tools);
            let url = format!(
                "{}/v1beta/models/{}:generateContent",
                self.base_url, self.model
            );

            let response = self
                .http
                .post(&url)
                .query(&[("key", secret)])
                .json(&body)
                .send()
                .await
                .map_err(|e| HyperflowError::LlmRequest(e.without_url().to_string()))?;

            into_generation(read_json(response).await?)
        })
    }
}
