use chrono::{DateTime, SecondsFormat, Utc};
use futures::future::BoxFuture;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

use hyperflow_core::error::{HyperflowError, Result};
use hyperflow_core::traits::KeyStore;
use hyperflow_core::types::{ProviderKey, ProviderType};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS provider_keys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        provider TEXT NOT NULL,
        label TEXT NOT NULL,
        encrypted_secret BLOB NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        failure_count INTEGER NOT NULL DEFAULT 0,
        last_used_at TEXT,
        created_at TEXT NOT NULL,
        UNIQUE(provider, label)
    );

    CREATE INDEX IF NOT EXISTS idx_provider_keys_selection
        ON provider_keys(provider, is_active, failure_count);";

const COLUMNS: &str =
    "id, provider, label, encrypted_secret, is_active, failure_count, last_used_at, created_at";

/// SQLite-backed credential store.
pub struct SqliteKeyStore {
    conn: Mutex<Connection>,
}

impl SqliteKeyStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HyperflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| HyperflowError::Database(e.to_string()))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| HyperflowError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| HyperflowError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Key store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| HyperflowError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| HyperflowError::Database(e.to_string()))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| HyperflowError::Database(e.to_string()))
    }
}

/// Fixed-width timestamps so lexical order in SQL matches time order.
fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn row_to_key(row: &Row<'_>) -> rusqlite::Result<ProviderKey> {
    let provider: String = row.get(1)?;
    let provider = provider
        .parse::<ProviderType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let last_used_at: Option<String> = row.get(6)?;
    let created_at: String = row.get(7)?;

    Ok(ProviderKey {
        id: row.get(0)?,
        provider,
        label: row.get(2)?,
        encrypted_secret: row.get(3)?,
        is_active: row.get(4)?,
        failure_count: row.get(5)?,
        last_used_at: last_used_at.as_deref().map(|s| parse_ts(6, s)).transpose()?,
        created_at: parse_ts(7, &created_at)?,
    })
}

fn fetch(conn: &Connection, id: i64) -> Result<Option<ProviderKey>> {
    conn.query_row(
        &format!("SELECT {} FROM provider_keys WHERE id = ?1", COLUMNS),
        params![id],
        row_to_key,
    )
    .optional()
    .map_err(|e| HyperflowError::Database(e.to_string()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

impl KeyStore for SqliteKeyStore {
    fn insert(
        &self,
        provider: ProviderType,
        label: &str,
        encrypted_secret: Vec<u8>,
    ) -> BoxFuture<'_, Result<ProviderKey>> {
        let label = label.to_string();

        Box::pin(async move {
            let conn = self.lock()?;
            let created_at = format_ts(Utc::now());

            conn.execute(
                "INSERT INTO provider_keys (provider, label, encrypted_secret, is_active, failure_count, created_at)
                 VALUES (?1, ?2, ?3, 1, 0, ?4)",
                params![provider.as_str(), label, encrypted_secret, created_at],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    HyperflowError::DuplicateLabel {
                        provider,
                        label: label.clone(),
                    }
                } else {
                    HyperflowError::Database(e.to_string())
                }
            })?;

            let id = conn.last_insert_rowid();
            fetch(&conn, id)?.ok_or_else(|| {
                HyperflowError::Database(format!("inserted key {} could not be read back", id))
            })
        })
    }

    fn list(&self, provider: Option<ProviderType>) -> BoxFuture<'_, Result<Vec<ProviderKey>>> {
        Box::pin(async move {
            let conn = self.lock()?;

            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM provider_keys
                     WHERE (?1 IS NULL OR provider = ?1)
                     ORDER BY provider ASC, label ASC",
                    COLUMNS
                ))
                .map_err(|e| HyperflowError::Database(e.to_string()))?;

            let rows = stmt
                .query_map(params![provider.map(|p| p.as_str())], row_to_key)
                .map_err(|e| HyperflowError::Database(e.to_string()))?;

            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| HyperflowError::Database(e.to_string()))
        })
    }

    fn get(&self, id: i64) -> BoxFuture<'_, Result<Option<ProviderKey>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            fetch(&conn, id)
        })
    }

    fn set_active(&self, id: i64, active: bool, reset_failures: bool) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let sql = if reset_failures {
                "UPDATE provider_keys SET is_active = ?2, failure_count = 0 WHERE id = ?1"
            } else {
                "UPDATE provider_keys SET is_active = ?2 WHERE id = ?1"
            };
            let changed = conn
                .execute(sql, params![id, active])
                .map_err(|e| HyperflowError::Database(e.to_string()))?;

            Ok(changed > 0)
        })
    }

    fn best_active(&self, provider: ProviderType) -> BoxFuture<'_, Result<Option<ProviderKey>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.query_row(
                &format!(
                    "SELECT {} FROM provider_keys
                     WHERE provider = ?1 AND is_active = 1
                     ORDER BY failure_count ASC,
                              (last_used_at IS NULL) DESC,
                              last_used_at ASC,
                              id ASC
                     LIMIT 1",
                    COLUMNS
                ),
                params![provider.as_str()],
                row_to_key,
            )
            .optional()
            .map_err(|e| HyperflowError::Database(e.to_string()))
        })
    }

    fn touch(&self, id: i64, at: DateTime<Utc>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE provider_keys SET last_used_at = ?2 WHERE id = ?1",
                params![id, format_ts(at)],
            )
            .map_err(|e| HyperflowError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn record_success(&self, id: i64, at: DateTime<Utc>) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE provider_keys
                 SET failure_count = 0, is_active = 1, last_used_at = ?2
                 WHERE id = ?1",
                params![id, format_ts(at)],
            )
            .map_err(|e| HyperflowError::Database(e.to_string()))?;
            Ok(())
        })
    }

    fn record_failure(&self, id: i64, threshold: u32) -> BoxFuture<'_, Result<Option<ProviderKey>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            // SET expressions see the pre-update row.
            let changed = conn
                .execute(
                    "UPDATE provider_keys
                     SET failure_count = failure_count + 1,
                         is_active = CASE WHEN failure_count + 1 >= ?2 THEN 0 ELSE is_active END
                     WHERE id = ?1",
                    params![id, threshold],
                )
                .map_err(|e| HyperflowError::Database(e.to_string()))?;

            if changed == 0 {
                return Ok(None);
            }
            fetch(&conn, id)
        })
    }

    fn delete(&self, id: i64) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let conn = self.lock()?;
            conn.execute("DELETE FROM provider_keys WHERE id = ?1", params![id])
                .map_err(|e| HyperflowError::Database(e.to_string()))?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let key = store
            .insert(ProviderType::OpenAi, "primary", vec![9, 9, 9])
            .await
            .unwrap();

        assert_eq!(key.label, "primary");
        assert!(key.is_active);
        assert_eq!(key.failure_count, 0);
        assert!(key.last_used_at.is_none());

        let fetched = store.get(key.id).await.unwrap().unwrap();
        assert_eq!(fetched.encrypted_secret, vec![9, 9, 9]);
        assert!(store.get(key.id + 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_label_per_provider() {
        let store = SqliteKeyStore::in_memory().unwrap();
        store.insert(ProviderType::OpenAi, "main", vec![1]).await.unwrap();

        let err = store
            .insert(ProviderType::OpenAi, "main", vec![2])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            HyperflowError::DuplicateLabel { provider: ProviderType::OpenAi, ref label } if label == "main"
        ));

        // Same label under another provider is fine.
        store.insert(ProviderType::Gemini, "main", vec![3]).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_ordering_and_filter() {
        let store = SqliteKeyStore::in_memory().unwrap();
        store.insert(ProviderType::OpenAi, "zeta", vec![1]).await.unwrap();
        store.insert(ProviderType::Anthropic, "beta", vec![1]).await.unwrap();
        store.insert(ProviderType::OpenAi, "alpha", vec![1]).await.unwrap();

        let all = store.list(None).await.unwrap();
        let names: Vec<_> = all
            .iter()
            .map(|k| format!("{}/{}", k.provider, k.label))
            .collect();
        assert_eq!(names, vec!["anthropic/beta", "openai/alpha", "openai/zeta"]);

        let openai = store.list(Some(ProviderType::OpenAi)).await.unwrap();
        assert_eq!(openai.len(), 2);
    }

    #[tokio::test]
    async fn test_best_active_prefers_fewest_failures_then_never_used() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let a = store.insert(ProviderType::OpenAi, "a", vec![1]).await.unwrap();
        let b = store.insert(ProviderType::OpenAi, "b", vec![1]).await.unwrap();
        let c = store.insert(ProviderType::OpenAi, "c", vec![1]).await.unwrap();

        store.record_failure(a.id, 3).await.unwrap();
        store.touch(b.id, Utc::now()).await.unwrap();

        // c: 0 failures, never used
        let best = store.best_active(ProviderType::OpenAi).await.unwrap().unwrap();
        assert_eq!(best.id, c.id);

        store.touch(c.id, Utc::now() - Duration::hours(1)).await.unwrap();
        // b and c both used; c is older
        let best = store.best_active(ProviderType::OpenAi).await.unwrap().unwrap();
        assert_eq!(best.id, c.id);

        store.touch(c.id, Utc::now() + Duration::hours(1)).await.unwrap();
        let best = store.best_active(ProviderType::OpenAi).await.unwrap().unwrap();
        assert_eq!(best.id, b.id);
    }

    #[tokio::test]
    async fn test_best_active_skips_inactive_and_other_providers() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let a = store.insert(ProviderType::OpenAi, "a", vec![1]).await.unwrap();
        store.insert(ProviderType::Anthropic, "b", vec![1]).await.unwrap();

        store.set_active(a.id, false, false).await.unwrap();
        assert!(store.best_active(ProviderType::OpenAi).await.unwrap().is_none());
        assert!(store.best_active(ProviderType::Anthropic).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_record_failure_deactivates_at_threshold() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let key = store.insert(ProviderType::Ollama, "local", vec![1]).await.unwrap();

        let after1 = store.record_failure(key.id, 3).await.unwrap().unwrap();
        assert_eq!(after1.failure_count, 1);
        assert!(after1.is_active);

        store.record_failure(key.id, 3).await.unwrap();
        let after3 = store.record_failure(key.id, 3).await.unwrap().unwrap();
        assert_eq!(after3.failure_count, 3);
        assert!(!after3.is_active);

        assert!(store.record_failure(999, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_success_reactivates() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let key = store.insert(ProviderType::OpenAi, "k", vec![1]).await.unwrap();
        for _ in 0..3 {
            store.record_failure(key.id, 3).await.unwrap();
        }

        store.record_success(key.id, Utc::now()).await.unwrap();
        let key = store.get(key.id).await.unwrap().unwrap();
        assert!(key.is_active);
        assert_eq!(key.failure_count, 0);
        assert!(key.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_set_active_reset_and_missing() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let key = store.insert(ProviderType::OpenAi, "k", vec![1]).await.unwrap();
        store.record_failure(key.id, 3).await.unwrap();

        assert!(store.set_active(key.id, true, true).await.unwrap());
        assert_eq!(store.get(key.id).await.unwrap().unwrap().failure_count, 0);
        assert!(!store.set_active(4242, true, true).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = SqliteKeyStore::in_memory().unwrap();
        let key = store.insert(ProviderType::OpenAi, "k", vec![1]).await.unwrap();
        store.delete(key.id).await.unwrap();
        assert!(store.get(key.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_open_on_disk_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("keys.db");
        {
            let store = SqliteKeyStore::open(&path).unwrap();
            store.insert(ProviderType::Gemini, "g", vec![7]).await.unwrap();
        }
        let store = SqliteKeyStore::open(&path).unwrap();
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }
}
