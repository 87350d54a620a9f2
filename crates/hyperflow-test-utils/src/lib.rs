//! Mocks and fixtures shared by hyperflow's unit and integration tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::{ChatProvider, ToolExecutor};
use hyperflow_core::types::*;
use hyperflow_keys::{CredentialVault, ProviderKeyRotator, SqliteKeyStore};
use hyperflow_llm::ProviderRegistry;

/// One `generate` call as seen by [`MockProvider`].
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub secret: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Scripted chat provider.
///
/// Queued results are returned in order; once the queue is empty every call
/// echoes the last user message. Secrets registered with
/// [`MockProvider::reject_secret`] always fail like a revoked key.
pub struct MockProvider {
    provider: ProviderType,
    model: String,
    queue: Mutex<VecDeque<Result<Generation>>>,
    rejected: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl MockProvider {
    pub fn new(provider: ProviderType) -> Self {
        Self {
            provider,
            model: "mock-model".into(),
            queue: Mutex::new(VecDeque::new()),
            rejected: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn push_reply(&self, text: &str) {
        self.push_result(Ok(Generation {
            text: text.to_string(),
            usage: Usage {
                input_tokens: 10,
                output_tokens: 5,
            },
            tool_calls: vec![],
        }));
    }

    pub fn push_result(&self, result: Result<Generation>) {
        self.queue.lock().unwrap().push_back(result);
    }

    pub fn reject_secret(&self, secret: &str) {
        self.rejected.lock().unwrap().insert(secret.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    /// A client handle for [`mock_registry`] factories that keeps recording
    /// into this mock.
    pub fn with_model_view(self: &Arc<Self>, model: &str) -> Arc<dyn ChatProvider> {
        Arc::new(ModelView {
            inner: self.clone(),
            model: model.to_string(),
        })
    }

    fn respond(
        &self,
        model: &str,
        secret: &str,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<Generation> {
        let echo = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        self.calls.lock().unwrap().push(RecordedCall {
            secret: secret.to_string(),
            model: model.to_string(),
            messages,
            temperature,
            max_tokens,
        });

        if self.rejected.lock().unwrap().contains(secret) {
            return Err(HyperflowError::LlmRequest("HTTP 401 Unauthorized: invalid api key".into()));
        }

        self.queue.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(Generation {
                text: echo,
                usage: Usage::default(),
                tool_calls: vec![],
            })
        })
    }
}

impl ChatProvider for MockProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider
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
        _tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Generation>> {
        Box::pin(async move { self.respond(&self.model, secret, messages, temperature, max_tokens) })
    }
}

struct ModelView {
    inner: Arc<MockProvider>,
    model: String,
}

impl ChatProvider for ModelView {
    fn provider_type(&self) -> ProviderType {
        self.inner.provider
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
        _tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Generation>> {
        Box::pin(async move {
            self.inner
                .respond(&self.model, secret, messages, temperature, max_tokens)
        })
    }
}

/// Registry whose only provider is `mock`; the requested model name is
/// recorded on each call.
pub fn mock_registry(mock: Arc<MockProvider>) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let provider = mock.provider;
    registry.register(
        provider,
        Box::new(move |model: Option<&str>| {
            let model = model.unwrap_or("mock-model");
            mock.with_model_view(model)
        }),
    );
    registry
}

/// One recorded [`ToolExecutor::execute`] call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub project_id: i64,
    pub project_name: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Tool collaborator with canned outcomes per tool name.
#[derive(Default)]
pub struct MockToolExecutor {
    outcomes: Mutex<HashMap<String, ToolOutcome>>,
    calls: Mutex<Vec<ToolInvocation>>,
}

impl MockToolExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcome(self, tool: &str, outcome: ToolOutcome) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .insert(tool.to_string(), outcome);
        self
    }

    pub fn calls(&self) -> Vec<ToolInvocation> {
        self.calls.lock().unwrap().clone()
    }
}

impl ToolExecutor for MockToolExecutor {
    fn execute<'a>(
        &'a self,
        project_id: i64,
        project_name: &'a str,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, ToolOutcome> {
        Box::pin(async move {
            self.calls.lock().unwrap().push(ToolInvocation {
                project_id,
                project_name: project_name.to_string(),
                tool_name: tool_name.to_string(),
                arguments,
            });
            self.outcomes
                .lock()
                .unwrap()
                .get(tool_name)
                .cloned()
                .unwrap_or_else(|| ToolOutcome::failure(format!("Tool '{}' not found", tool_name)))
        })
    }
}

/// A vault keyed with a fresh random secret.
pub fn test_vault() -> Arc<CredentialVault> {
    Arc::new(
        CredentialVault::from_secret(&CredentialVault::generate_secret())
            .expect("generated secret is valid"),
    )
}

/// Rotator over an in-memory store with no pause between attempts.
pub fn test_rotator() -> (Arc<ProviderKeyRotator>, Arc<SqliteKeyStore>) {
    let store = Arc::new(SqliteKeyStore::in_memory().expect("in-memory sqlite"));
    let rotator =
        ProviderKeyRotator::new(store.clone(), test_vault()).with_pause(Duration::ZERO);
    (Arc::new(rotator), store)
}

/// Write `hyperflow.toml` into a temp dir. `extra` is appended after the
/// `[vault]` and `[storage]` sections, so it must not repeat them.
pub fn temp_config(extra: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join("hyperflow.toml");
    let content = format!(
        "[vault]\nsecret = \"{}\"\n\n[storage]\ndatabase = \"{}\"\ndata_dir = \"{}\"\n\n{}",
        CredentialVault::generate_secret(),
        dir.path().join("hyperflow.db").display(),
        dir.path().display(),
        extra
    );
    std::fs::write(&path, content).expect("write config");
    (dir, path)
}
