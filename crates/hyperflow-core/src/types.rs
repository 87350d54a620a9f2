use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::HyperflowError;

/// LLM provider family a credential belongs to.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
    Gemini,
    Ollama,
}

impl ProviderType {
    pub const ALL: [ProviderType; 4] = [Self::OpenAi, Self::Anthropic, Self::Gemini, Self::Ollama];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Anthropic => "anthropic",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = HyperflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(HyperflowError::UnsupportedProvider(other.to_string())),
        }
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A single chat turn sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Token accounting reported by a provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    /// Raw arguments as sent by the provider (usually a JSON string or object).
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Normalized reply of a single `generate` call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Generation {
    pub text: String,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Tool definition offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Result of executing a named tool for a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl ToolOutcome {
    pub fn success(output: serde_json::Value) -> Self {
        Self {
            success: true,
            output,
            description: None,
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            description: Some(description.into()),
        }
    }
}

/// One labeled credential for a single provider.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderKey {
    pub id: i64,
    pub provider: ProviderType,
    pub label: String,
    #[serde(skip)]
    pub encrypted_secret: Vec<u8>,
    pub is_active: bool,
    pub failure_count: u32,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderKey")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("label", &self.label)
            .field("encrypted_secret", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .field("failure_count", &self.failure_count)
            .field("last_used_at", &self.last_used_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parse() {
        assert_eq!("OpenAI".parse::<ProviderType>().unwrap(), ProviderType::OpenAi);
        assert_eq!(" ollama ".parse::<ProviderType>().unwrap(), ProviderType::Ollama);
        assert!(matches!(
            "grok".parse::<ProviderType>(),
            Err(HyperflowError::UnsupportedProvider(p)) if p == "grok"
        ));
    }

    #[test]
    fn test_provider_type_serde() {
        let json = serde_json::to_string(&ProviderType::OpenAi).unwrap();
        assert_eq!(json, "\"openai\"");
        let back: ProviderType = serde_json::from_str("\"anthropic\"").unwrap();
        assert_eq!(back, ProviderType::Anthropic);
    }

    #[test]
    fn test_provider_key_debug_redacts_secret() {
        let key = ProviderKey {
            id: 1,
            provider: ProviderType::OpenAi,
            label: "main".into(),
            encrypted_secret: vec![1, 2, 3],
            is_active: true,
            failure_count: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };
        let dbg = format!("{:?}", key);
        assert!(dbg.contains("[REDACTED]"));
        assert!(!dbg.contains("[1, 2, 3]"));
    }

    #[test]
    fn test_generation_tool_calls_default() {
        let gen: Generation = serde_json::from_str(r#"{"text":"hi"}"#).unwrap();
        assert_eq!(gen.text, "hi");
        assert!(gen.tool_calls.is_empty());
        assert_eq!(gen.usage.total(), 0);
    }
}
