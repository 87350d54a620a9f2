use thiserror::Error;

use crate::types::ProviderType;

#[derive(Debug, Error)]
pub enum HyperflowError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM provider not supported: {0}")]
    UnsupportedProvider(String),

    #[error("LLM response parse error: {0}")]
    LlmParse(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Invalid vault secret: {0}")]
    InvalidVaultSecret(String),

    // Storage errors
    #[error("Database error: {0}")]
    Database(String),

    // Credential errors
    #[error("Key label '{label}' already exists for provider {provider}")]
    DuplicateLabel { provider: ProviderType, label: String },

    #[error("Provider key not found: {0}")]
    KeyNotFound(i64),

    #[error("No active keys configured for provider: {0}")]
    NoActiveKeys(ProviderType),

    #[error("All keys exhausted for provider {provider} after {attempts} attempt(s): {source}")]
    KeysExhausted {
        provider: ProviderType,
        attempts: usize,
        #[source]
        source: Box<HyperflowError>,
    },

    // Graph errors
    #[error("Invalid workflow graph: {0}")]
    InvalidGraph(String),

    // Node execution errors
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Script execution error: {0}")]
    Script(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HyperflowError {
    /// True for the two "no credential could serve this call" outcomes.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, Self::NoActiveKeys(_) | Self::KeysExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, HyperflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_keeps_last_failure() {
        let err = HyperflowError::KeysExhausted {
            provider: ProviderType::OpenAi,
            attempts: 2,
            source: Box::new(HyperflowError::LlmRequest("HTTP 429".into())),
        };
        let msg = err.to_string();
        assert!(msg.contains("openai"));
        assert!(msg.contains("2 attempt"));
        assert!(msg.contains("HTTP 429"));
        assert!(err.is_credential_error());
    }

    #[test]
    fn test_no_active_keys_message() {
        let err = HyperflowError::NoActiveKeys(ProviderType::Gemini);
        assert_eq!(err.to_string(), "No active keys configured for provider: gemini");
        assert!(!HyperflowError::Config("x".into()).is_credential_error());
    }
}
