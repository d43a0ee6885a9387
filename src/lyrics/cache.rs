//! Result cache.
//!
//! Finished documents are keyed by a fingerprint of the normalized query.
//! Only documents produced by the default (standard) enrichment path are
//! written; personalized results stay with the caller that asked for them.
//!
//! # Storage
//!
//! - [`JsonFileStore`]: one JSON file holding every entry, loaded on open and
//!   rewritten on each store.
//! - [`MemoryStore`]: a bounded LRU map, used when no cache path is set.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::OwnedMutexGuard;

use crate::config::CacheConfig;
use crate::lyrics::types::{LyricsDocument, LyricsQuery};

// ============================================================================
// Cache Types
// ============================================================================

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serde error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Deterministic key derived from the normalized title, artist and album.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheFingerprint(String);

impl CacheFingerprint {
    /// Lowercase and collapse whitespace.
    fn normalize(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
    }

    /// Fingerprint a query. With `bucket_secs`, durations falling in the
    /// same bucket share a fingerprint; queries without a duration use
    /// their own bucket.
    pub fn from_query(query: &LyricsQuery, bucket_secs: Option<u32>) -> Self {
        let mut key = format!(
            "{}|{}|{}",
            Self::normalize(&query.title),
            Self::normalize(&query.artist),
            Self::normalize(query.album())
        );
        if let Some(bucket) = bucket_secs.filter(|b| *b > 0) {
            match query.duration {
                Some(d) => key.push_str(&format!("|{}", (d.max(0.0) as u64) / u64::from(bucket))),
                None => key.push_str("|-"),
            }
        }
        Self(hex::encode(Sha1::digest(key.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who a document was rendered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Default enrichment; shareable.
    Standard,
    /// Caller-specific style or credentials; never stored.
    Personalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: CacheFingerprint,
    pub document: LyricsDocument,
    pub origin: Origin,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

// ============================================================================
// Stores
// ============================================================================

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn load(&self, fingerprint: &CacheFingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Last writer wins.
    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError>;
}

/// Bounded in-memory store.
pub struct MemoryStore {
    entries: Mutex<LruCache<CacheFingerprint, CacheEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn load(&self, fingerprint: &CacheFingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(fingerprint).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(entry.fingerprint.clone(), entry);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<CacheFingerprint, CacheEntry>,
}

/// JSON file store.
pub struct JsonFileStore {
    path: PathBuf,
    data: tokio::sync::Mutex<CacheFile>,
}

impl JsonFileStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub async fn open(path: PathBuf) -> Self {
        let data = match read_cache_file(&path).await {
            Ok(file) => {
                tracing::info!(path = %path.display(), entries = file.entries.len(), "Loaded lyrics cache");
                file
            }
            Err(CacheError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Creating new lyrics cache");
                CacheFile::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load cache, starting empty");
                CacheFile::default()
            }
        };
        Self {
            path,
            data: tokio::sync::Mutex::new(data),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_cache_file(path: &Path) -> Result<CacheFile, CacheError> {
    let mut file = fs::File::open(path).await?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).await?;
    Ok(serde_json::from_str(&contents)?)
}

/// Write via a sibling temp file so a crash never leaves half a cache.
async fn write_cache_file(path: &Path, data: &CacheFile) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(data)?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(json.as_bytes()).await?;
    file.flush().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl CacheStore for JsonFileStore {
    async fn load(&self, fingerprint: &CacheFingerprint) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.data.lock().await.entries.get(fingerprint).cloned())
    }

    async fn store(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let mut data = self.data.lock().await;
        data.entries.insert(entry.fingerprint.clone(), entry);
        write_cache_file(&self.path, &data).await
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Cache front end used by the service. Store failures never surface: a
/// failed read is a miss, a failed write is logged.
pub struct LyricsCache {
    store: Arc<dyn CacheStore>,
    bucket_secs: Option<u32>,
}

impl LyricsCache {
    pub fn new(store: Arc<dyn CacheStore>, bucket_secs: Option<u32>) -> Self {
        Self { store, bucket_secs }
    }

    /// File-backed when a path is configured, in-memory otherwise.
    pub async fn from_config(config: &CacheConfig) -> Self {
        let store: Arc<dyn CacheStore> = match &config.path {
            Some(path) => Arc::new(JsonFileStore::open(path.clone()).await),
            None => Arc::new(MemoryStore::new(config.capacity)),
        };
        Self::new(store, config.duration_bucket_secs)
    }

    pub fn fingerprint(&self, query: &LyricsQuery) -> CacheFingerprint {
        CacheFingerprint::from_query(query, self.bucket_secs)
    }

    pub async fn get(&self, fingerprint: &CacheFingerprint) -> Option<LyricsDocument> {
        match self.store.load(fingerprint).await {
            Ok(Some(entry)) if entry.origin == Origin::Standard => {
                tracing::debug!(fingerprint = %fingerprint, "Cache hit");
                Some(entry.document)
            }
            Ok(_) => {
                tracing::debug!(fingerprint = %fingerprint, "Cache miss");
                None
            }
            Err(e) => {
                tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    pub async fn put(&self, fingerprint: CacheFingerprint, document: LyricsDocument, origin: Origin) {
        if origin == Origin::Personalized {
            tracing::debug!(fingerprint = %fingerprint, "Not caching personalized document");
            return;
        }
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            document,
            origin,
            created_at: now_secs(),
        };
        if let Err(e) = self.store.store(entry).await {
            tracing::warn!(fingerprint = %fingerprint, error = %e, "Cache write failed");
        }
    }
}

/// One async mutex per fingerprint so concurrent requests for the same
/// track compute it once.
#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<CacheFingerprint, Weak<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &CacheFingerprint) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|_, weak| weak.strong_count() > 0);
            match locks.get(key).and_then(Weak::upgrade) {
                Some(lock) => lock,
                None => {
                    let lock = Arc::new(tokio::sync::Mutex::new(()));
                    locks.insert(key.clone(), Arc::downgrade(&lock));
                    lock
                }
            }
        };
        lock.lock_owned().await
    }

    /// Keys with a live lock holder or waiter.
    pub fn active(&self) -> usize {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.values().filter(|w| w.strong_count() > 0).count()
    }
}
