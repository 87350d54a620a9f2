pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use serde::de::DeserializeOwned;

use hyperflow_core::error::{HyperflowError, Result};

/// Turn a provider response into `T`, mapping non-2xx statuses to `LlmRequest`.
pub(crate) async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown".to_string());
        return Err(HyperflowError::LlmRequest(format!("HTTP {}: {}", status, body)));
    }

    let text = response
        .text()
        .await
        .map_err(|e| HyperflowError::LlmRequest(e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| HyperflowError::LlmParse(e.to_string()))
}

/// Tool-call arguments arrive as a JSON string from some providers.
pub(crate) fn parse_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()))
}

pub(crate) fn trim_base(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}
