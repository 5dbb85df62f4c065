use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A stored HTTP response, enough to serve it again or revalidate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub body: String,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub stored_at: DateTime<Utc>,
    /// Freshness lifetime from `Cache-Control: max-age`, in seconds.
    pub max_age: Option<u64>,
}

impl CachedResponse {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        let age = now.signed_duration_since(self.stored_at).num_seconds();
        // A negative age means the clock went backwards; revalidate.
        u64::try_from(age).is_ok_and(|age| age < max_age)
    }

    /// Copy of this response re-validated at `now`, keeping the body.
    pub fn revalidated(&self, now: DateTime<Utc>, max_age: Option<u64>) -> Self {
        Self {
            stored_at: now,
            max_age: max_age.or(self.max_age),
            ..self.clone()
        }
    }
}

/// Response cache shared by every fetch in a cycle, and across cycles.
/// Implementations must tolerate concurrent `get`/`put` from many tasks.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<CachedResponse>;
    async fn put(&self, key: &str, response: CachedResponse);
}

#[derive(Default, Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, CachedResponse>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, response: CachedResponse) {
        self.entries.write().await.insert(key.to_string(), response);
    }
}

/// One JSON file per key, named by the SHA-256 of the key.
///
/// Writes go through a temp file and a rename, so concurrent writers of the same key
/// leave one complete entry behind and readers never see a torn file.
#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(format!("{:x}.json", digest))
    }
}

#[async_trait]
impl CacheStore for DiskCache {
    async fn get(&self, key: &str) -> Option<CachedResponse> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to read cache entry {}: {}", path.display(), e);
                }
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(response) => Some(response),
            Err(e) => {
                warn!("Ignoring corrupt cache entry {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn put(&self, key: &str, response: CachedResponse) {
        let path = self.path_for(key);
        let bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to serialize cache entry for {}: {}", key, e);
                return;
            }
        };

        let dir = self.dir.clone();
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
            temp.write_all(&bytes)?;
            temp.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await;

        match written {
            Ok(Ok(())) => debug!("Stored cache entry {} for {}", path.display(), key),
            Ok(Err(e)) => warn!("Failed to store cache entry for {}: {}", key, e),
            Err(e) => warn!("Cache writer task failed for {}: {}", key, e),
        }
    }
}
