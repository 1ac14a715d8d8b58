// src/bot/decision_cache.rs - Content-addressed store of prior verdicts

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("verdict store lock poisoned")]
    LockPoisoned,

    #[error("invalid timestamp {0} in verdict store")]
    InvalidTimestamp(i64),
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// A stored verdict, keyed by the digest of the exact message text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub digest: String,
    pub flagged: bool,
    pub created_at: DateTime<Utc>,
}

/// SHA-256 of the exact message bytes, lowercase hex
pub fn content_digest(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Persistent storage behind the decision cache
#[async_trait]
pub trait VerdictStore: Send + Sync {
    async fn get(&self, digest: &str) -> CacheResult<Option<CacheEntry>>;

    /// Insert or replace the entry for `entry.digest`
    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()>;

    /// Delete every non-flagged entry, returning how many were removed
    async fn purge_allowed(&self) -> CacheResult<usize>;

    async fn count(&self, flagged: bool) -> CacheResult<usize>;
}

/// SQLite-backed verdict store
#[derive(Clone)]
pub struct SqliteVerdictStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteVerdictStore {
    pub fn open(db_path: impl AsRef<Path>) -> CacheResult<Self> {
        let conn = Connection::open(db_path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> CacheResult<()> {
        let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS message_verdicts (
                digest TEXT PRIMARY KEY,
                flagged INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_message_verdicts_flagged
             ON message_verdicts(flagged)",
            [],
        )?;
        Ok(())
    }
}

#[async_trait]
impl VerdictStore for SqliteVerdictStore {
    async fn get(&self, digest: &str) -> CacheResult<Option<CacheEntry>> {
        let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
        let row = conn
            .query_row(
                "SELECT digest, flagged, created_at FROM message_verdicts WHERE digest = ?1",
                params![digest],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, bool>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        match row {
            Some((digest, flagged, created_at)) => {
                let created_at = Utc
                    .timestamp_opt(created_at, 0)
                    .single()
                    .ok_or(CacheError::InvalidTimestamp(created_at))?;
                Ok(Some(CacheEntry {
                    digest,
                    flagged,
                    created_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
        conn.execute(
            "INSERT OR REPLACE INTO message_verdicts (digest, flagged, created_at)
             VALUES (?1, ?2, ?3)",
            params![&entry.digest, entry.flagged, entry.created_at.timestamp()],
        )?;
        Ok(())
    }

    async fn purge_allowed(&self) -> CacheResult<usize> {
        let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
        let removed = conn.execute("DELETE FROM message_verdicts WHERE flagged = 0", [])?;
        Ok(removed)
    }

    async fn count(&self, flagged: bool) -> CacheResult<usize> {
        let conn = self.conn.lock().map_err(|_| CacheError::LockPoisoned)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM message_verdicts WHERE flagged = ?1",
            params![flagged],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

/// Process-local verdict store, used when no cache path is configured
#[derive(Clone, Default)]
pub struct MemoryVerdictStore {
    entries: Arc<tokio::sync::RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryVerdictStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerdictStore for MemoryVerdictStore {
    async fn get(&self, digest: &str) -> CacheResult<Option<CacheEntry>> {
        Ok(self.entries.read().await.get(digest).cloned())
    }

    async fn upsert(&self, entry: &CacheEntry) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.digest.clone(), entry.clone());
        Ok(())
    }

    async fn purge_allowed(&self) -> CacheResult<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.flagged);
        Ok(before - entries.len())
    }

    async fn count(&self, flagged: bool) -> CacheResult<usize> {
        Ok(self
            .entries
            .read()
            .await
            .values()
            .filter(|entry| entry.flagged == flagged)
            .count())
    }
}

/// Memoizes verdicts for exact repeats of a message.
///
/// Storage failures never block a decision: a failed lookup reads as a miss
/// and a failed write is logged and dropped.
#[derive(Clone)]
pub struct DecisionCache {
    store: Arc<dyn VerdictStore>,
}

impl DecisionCache {
    pub fn new(store: Arc<dyn VerdictStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryVerdictStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn VerdictStore> {
        &self.store
    }

    pub async fn lookup(&self, text: &str) -> Option<bool> {
        let digest = content_digest(text);
        match self.store.get(&digest).await {
            Ok(entry) => entry.map(|e| e.flagged),
            Err(e) => {
                warn!("Verdict lookup failed for {}, treating as miss: {}", digest, e);
                None
            }
        }
    }

    pub async fn record(&self, text: &str, flagged: bool) {
        let entry = CacheEntry {
            digest: content_digest(text),
            flagged,
            created_at: Utc::now(),
        };
        match self.store.upsert(&entry).await {
            Ok(()) => debug!("Cached verdict {} for {}", flagged, entry.digest),
            Err(e) => warn!("Failed to cache verdict for {}: {}", entry.digest, e),
        }
    }

    /// Startup maintenance: keep only flagged verdicts
    pub async fn purge_allowed(&self) -> CacheResult<usize> {
        let removed = self.store.purge_allowed().await?;
        info!("Purged {} allowed verdicts from decision cache", removed);
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// Store whose every operation fails
    struct BrokenStore;

    #[async_trait]
    impl VerdictStore for BrokenStore {
        async fn get(&self, _digest: &str) -> CacheResult<Option<CacheEntry>> {
            Err(CacheError::LockPoisoned)
        }

        async fn upsert(&self, _entry: &CacheEntry) -> CacheResult<()> {
            Err(CacheError::LockPoisoned)
        }

        async fn purge_allowed(&self) -> CacheResult<usize> {
            Err(CacheError::LockPoisoned)
        }

        async fn count(&self, _flagged: bool) -> CacheResult<usize> {
            Err(CacheError::LockPoisoned)
        }
    }

    #[test]
    fn test_digest_is_deterministic() {
        let a = content_digest("vote wisely");
        assert_eq!(a, content_digest("vote wisely"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_digest_sensitive_to_single_character() {
        let base = content_digest("hello world");
        assert_ne!(base, content_digest("hello world "));
        assert_ne!(base, content_digest("Hello world"));
        assert_ne!(base, content_digest("hello worle"));
    }

    #[tokio::test]
    async fn test_sqlite_record_overwrites() {
        let cache = DecisionCache::new(Arc::new(SqliteVerdictStore::in_memory().unwrap()));

        assert_eq!(cache.lookup("msg").await, None);
        cache.record("msg", false).await;
        assert_eq!(cache.lookup("msg").await, Some(false));
        cache.record("msg", true).await;
        assert_eq!(cache.lookup("msg").await, Some(true));
    }

    #[tokio::test]
    async fn test_purge_keeps_only_flagged() {
        for store in [
            Arc::new(SqliteVerdictStore::in_memory().unwrap()) as Arc<dyn VerdictStore>,
            Arc::new(MemoryVerdictStore::new()) as Arc<dyn VerdictStore>,
        ] {
            let cache = DecisionCache::new(store.clone());
            cache.record("allowed one", false).await;
            cache.record("allowed two", false).await;
            cache.record("flagged one", true).await;

            assert_eq!(cache.purge_allowed().await.unwrap(), 2);
            assert_eq!(store.count(false).await.unwrap(), 0);
            assert_eq!(store.count(true).await.unwrap(), 1);
            assert_eq!(cache.lookup("flagged one").await, Some(true));
            assert_eq!(cache.lookup("allowed one").await, None);
        }
    }

    #[tokio::test]
    async fn test_sqlite_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("verdicts.db");

        {
            let cache = DecisionCache::new(Arc::new(SqliteVerdictStore::open(&path).unwrap()));
            cache.record("GE2025 rally", true).await;
        }

        let store = SqliteVerdictStore::open(&path).unwrap();
        let entry = store
            .get(&content_digest("GE2025 rally"))
            .await
            .unwrap()
            .unwrap();
        assert!(entry.flagged);
        assert!(entry.created_at <= Utc::now());
    }

    #[test_log::test(tokio::test)]
    async fn test_storage_errors_degrade_to_miss() {
        let cache = DecisionCache::new(Arc::new(BrokenStore));
        cache.record("anything", true).await;
        assert_eq!(cache.lookup("anything").await, None);
        assert!(cache.purge_allowed().await.is_err());
    }
}
