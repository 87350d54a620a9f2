use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use hyperflow_core::config::RotationConfig;
use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::KeyStore;
use hyperflow_core::types::{ProviderKey, ProviderType};

use crate::vault::CredentialVault;

/// Consecutive failures after which a key is taken out of rotation.
pub const FAILURE_THRESHOLD: u32 = 3;

/// Hands out provider keys and fails over between them.
///
/// All state lives in the [`KeyStore`]; concurrent callers may pick the same
/// key, and no lock is held while an operation runs.
pub struct ProviderKeyRotator {
    store: Arc<dyn KeyStore>,
    vault: Arc<CredentialVault>,
    pause: Duration,
}

impl ProviderKeyRotator {
    pub fn new(store: Arc<dyn KeyStore>, vault: Arc<CredentialVault>) -> Self {
        Self {
            store,
            vault,
            pause: Duration::from_millis(100),
        }
    }

    pub fn from_config(
        store: Arc<dyn KeyStore>,
        vault: Arc<CredentialVault>,
        config: &RotationConfig,
    ) -> Self {
        Self::new(store, vault).with_pause(Duration::from_millis(config.retry_pause_ms))
    }

    /// Pause between attempts on different keys.
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub async fn add_key(
        &self,
        provider: ProviderType,
        label: &str,
        secret: &str,
    ) -> Result<ProviderKey> {
        let sealed = self.vault.encrypt(secret)?;
        let key = self.store.insert(provider, label, sealed).await?;
        info!(provider = %provider, label, key_id = key.id, "Provider key added");
        Ok(key)
    }

    pub async fn list_keys(&self, provider: Option<ProviderType>) -> Result<Vec<ProviderKey>> {
        self.store.list(provider).await
    }

    /// Put a key back into rotation with a clean failure count.
    pub async fn activate(&self, id: i64) -> Result<()> {
        if !self.store.set_active(id, true, true).await? {
            return Err(HyperflowError::KeyNotFound(id));
        }
        info!(key_id = id, "Provider key activated");
        Ok(())
    }

    pub async fn deactivate(&self, id: i64) -> Result<()> {
        if !self.store.set_active(id, false, false).await? {
            return Err(HyperflowError::KeyNotFound(id));
        }
        info!(key_id = id, "Provider key deactivated");
        Ok(())
    }

    /// Pick the preferred active key and open its secret.
    ///
    /// A record whose ciphertext no longer opens is deleted and selection
    /// moves on to the next candidate.
    pub async fn next_key(&self, provider: ProviderType) -> Result<Option<(ProviderKey, String)>> {
        loop {
            let Some(mut key) = self.store.best_active(provider).await? else {
                return Ok(None);
            };

            let Some(secret) = self.vault.decrypt(&key.encrypted_secret) else {
                warn!(
                    provider = %provider,
                    key_id = key.id,
                    label = %key.label,
                    "Stored key cannot be decrypted, deleting it"
                );
                self.store.delete(key.id).await?;
                continue;
            };

            let now = Utc::now();
            self.store.touch(key.id, now).await?;
            key.last_used_at = Some(now);
            debug!(provider = %provider, key_id = key.id, "Selected provider key");
            return Ok(Some((key, secret)));
        }
    }

    pub async fn mark_success(&self, id: i64) -> Result<()> {
        self.store.record_success(id, Utc::now()).await
    }

    pub async fn mark_failure(&self, id: i64) -> Result<()> {
        if let Some(key) = self.store.record_failure(id, FAILURE_THRESHOLD).await? {
            if !key.is_active {
                warn!(
                    provider = %key.provider,
                    key_id = id,
                    failures = key.failure_count,
                    "Provider key deactivated after repeated failures"
                );
            }
        }
        Ok(())
    }

    /// Run `op` with successive keys until one succeeds.
    ///
    /// Each distinct key is tried at most once per call. With no usable key
    /// and no failed attempt the result is [`HyperflowError::NoActiveKeys`];
    /// once attempts have failed it is [`HyperflowError::KeysExhausted`]
    /// carrying the last failure.
    pub async fn rotate_until_success<T, F, Fut>(&self, provider: ProviderType, mut op: F) -> Result<T>
    where
        F: FnMut(String, i64) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempted: HashSet<i64> = HashSet::new();
        let mut last_error: Option<HyperflowError> = None;

        loop {
            let Some((key, secret)) = self.next_key(provider).await? else {
                return Err(match last_error {
                    None => HyperflowError::NoActiveKeys(provider),
                    Some(source) => HyperflowError::KeysExhausted {
                        provider,
                        attempts: attempted.len(),
                        source: Box::new(source),
                    },
                });
            };

            if !attempted.insert(key.id) {
                let source = last_error.unwrap_or_else(|| {
                    HyperflowError::LlmRequest(format!("key {} selected twice", key.id))
                });
                return Err(HyperflowError::KeysExhausted {
                    provider,
                    attempts: attempted.len(),
                    source: Box::new(source),
                });
            }

            match op(secret, key.id).await {
                Ok(value) => {
                    self.mark_success(key.id).await?;
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        provider = %provider,
                        key_id = key.id,
                        attempt = attempted.len(),
                        error = %e,
                        "Provider call failed, rotating to next key"
                    );
                    self.mark_failure(key.id).await?;
                    last_error = Some(e);
                    if !self.pause.is_zero() {
                        tokio::time::sleep(self.pause).await;
                    }
                }
            }
        }
    }
}
