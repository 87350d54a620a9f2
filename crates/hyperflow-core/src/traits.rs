use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// Chat-completion client for one provider and model.
pub trait ChatProvider: Send + Sync + 'static {
    /// Provider family served by this client.
    fn provider_type(&self) -> ProviderType;

    /// Model id used when the caller did not pick one.
    fn model(&self) -> &str;

    /// Send a single non-streaming request authenticated with `secret`.
    fn generate<'a>(
        &'a self,
        secret: &'a str,
        messages: Vec<ChatMessage>,
        temperature: f32,
        max_tokens: u32,
        tools: &'a [ToolDefinition],
    ) -> BoxFuture<'a, Result<Generation>>;
}

/// Runs a named tool on behalf of a project.
pub trait ToolExecutor: Send + Sync + 'static {
    fn execute<'a>(
        &'a self,
        project_id: i64,
        project_name: &'a str,
        tool_name: &'a str,
        arguments: serde_json::Value,
    ) -> BoxFuture<'a, ToolOutcome>;
}

/// Persistence backend for provider credentials.
///
/// Every method is a single read-modify-write against storage; callers get no
/// cross-call locking.
pub trait KeyStore: Send + Sync + 'static {
    /// Insert a new key. Fails with `DuplicateLabel` when `(provider, label)` exists.
    fn insert(
        &self,
        provider: ProviderType,
        label: &str,
        encrypted_secret: Vec<u8>,
    ) -> BoxFuture<'_, Result<ProviderKey>>;

    /// List keys ordered by provider then label.
    fn list(&self, provider: Option<ProviderType>) -> BoxFuture<'_, Result<Vec<ProviderKey>>>;

    fn get(&self, id: i64) -> BoxFuture<'_, Result<Option<ProviderKey>>>;

    /// Set the active flag; `reset_failures` also zeroes the failure count.
    /// Returns false when no such key exists.
    fn set_active(&self, id: i64, active: bool, reset_failures: bool) -> BoxFuture<'_, Result<bool>>;

    /// The preferred active key for a provider: lowest failure count, then
    /// never-used first, then oldest `last_used_at`.
    fn best_active(&self, provider: ProviderType) -> BoxFuture<'_, Result<Option<ProviderKey>>>;

    fn touch(&self, id: i64, at: DateTime<Utc>) -> BoxFuture<'_, Result<()>>;

    /// Zero the failure count, reactivate, and refresh `last_used_at`.
    fn record_success(&self, id: i64, at: DateTime<Utc>) -> BoxFuture<'_, Result<()>>;

    /// Increment the failure count, deactivating at `threshold`.
    /// Returns the updated record, or `None` when the key no longer exists.
    fn record_failure(&self, id: i64, threshold: u32) -> BoxFuture<'_, Result<Option<ProviderKey>>>;

    fn delete(&self, id: i64) -> BoxFuture<'_, Result<()>>;
}
