use std::time::Duration;

use futures::future::BoxFuture;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use hyperflow_core::error::{HyperflowError, Result};

use super::lenient::{opt_f64, opt_string};
use super::{parse_config, NodeExecutor};
use crate::context::RunContext;
use crate::graph::NodeType;
use crate::result::NodeResult;
use crate::template::stringify;

const DEFAULT_TIMEOUT_SECS: f64 = 30.0;
const ERROR_SNIPPET_CHARS: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpConfig {
    #[serde(default, deserialize_with = "opt_string")]
    url: Option<String>,
    #[serde(default, deserialize_with = "opt_string")]
    method: Option<String>,
    #[serde(default)]
    headers: Value,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    body: Value,
    #[serde(default, alias = "timeout_seconds", deserialize_with = "opt_f64")]
    timeout_seconds: Option<f64>,
}

/// Flatten an object into string pairs; anything else yields nothing.
fn string_pairs(value: &Value) -> Vec<(String, String)> {
    value
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| (k.clone(), stringify(v)))
                .collect()
        })
        .unwrap_or_default()
}

fn snippet(body: &str) -> String {
    if body.chars().count() > ERROR_SNIPPET_CHARS {
        let cut: String = body.chars().take(ERROR_SNIPPET_CHARS).collect();
        format!("{}...", cut)
    } else {
        body.to_string()
    }
}

/// Outbound HTTP call. The response body is JSON when it parses, else text.
pub struct HttpNode {
    client: reqwest::Client,
}

impl HttpNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    async fn run(&self, config: Value) -> Result<NodeResult> {
        let cfg: HttpConfig = parse_config(NodeType::Http, config)?;

        let Some(url) = cfg.url else {
            return Ok(NodeResult::failure("HTTP node requires 'url'"));
        };
        let method = cfg
            .method
            .unwrap_or_else(|| "GET".to_string())
            .to_uppercase()
            .parse::<reqwest::Method>()
            .map_err(|e| HyperflowError::Http(format!("Invalid method: {}", e)))?;
        let timeout_secs = cfg
            .timeout_seconds
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        debug!(method = %method, url = %url, timeout_secs, "Dispatching HTTP node");

        let mut req = self.client.request(method, &url);
        // A timeout too large for Duration means no timeout.
        if let Ok(timeout) = Duration::try_from_secs_f64(timeout_secs) {
            req = req.timeout(timeout);
        }
        for (k, v) in string_pairs(&cfg.headers) {
            req = req.header(k.as_str(), v.as_str());
        }
        let params = string_pairs(&cfg.params);
        if !params.is_empty() {
            req = req.query(&params);
        }
        if !cfg.body.is_null() {
            req = req.json(&cfg.body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| HyperflowError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| HyperflowError::Http(e.to_string()))?;

        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "HTTP node got error status");
            return Ok(NodeResult {
                status_code: Some(status.as_u16()),
                ..NodeResult::failure(format!("HTTP {} from {}: {}", status, url, snippet(&text)))
            });
        }

        let output = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
        Ok(NodeResult {
            status_code: Some(status.as_u16()),
            ..NodeResult::success(output)
        })
    }
}

impl Default for HttpNode {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeExecutor for HttpNode {
    fn execute<'a>(&'a self, config: Value, _ctx: &'a RunContext) -> BoxFuture<'a, Result<NodeResult>> {
        Box::pin(self.run(config))
    }
}
