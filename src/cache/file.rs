//! On-disk cache backend, so entries outlive the process.
//!
//! One JSON file per key under the cache directory. Each file records its own
//! expiry, which is checked on every read; an expired file is removed the
//! first time it is seen.

use super::CacheBackend;
use crate::error::CacheError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Serialize, Deserialize)]
struct Envelope {
    expires_at: DateTime<Utc>,
    /// Base64 of the stored bytes.
    payload: String,
}

impl Envelope {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// Cache rooted at `dir`; the directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Keys are hashed so any string maps to a portable file name.
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", blake3::hash(key.as_bytes()).to_hex()))
    }

    /// Read an entry, deleting it if it has expired or cannot be decoded.
    async fn read_live(&self, key: &str) -> Result<Option<Envelope>, CacheError> {
        let path = self.path_for(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        match serde_json::from_slice::<Envelope>(&bytes) {
            Ok(entry) if entry.is_live(Utc::now()) => Ok(Some(entry)),
            Ok(_) => {
                debug!(key, "cache file expired");
                remove_quietly(&path).await;
                Ok(None)
            }
            Err(e) => {
                warn!(key, path = %path.display(), error = %e, "discarding unreadable cache");
                remove_quietly(&path).await;
                Ok(None)
            }
        }
    }

    /// Delete every expired or unreadable file; returns how many were removed.
    pub async fn purge_expired(&self) -> Result<usize, CacheError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_err(&self.dir, e)),
        };
        let now = Utc::now();
        let mut removed = 0;
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_err(&self.dir, e))? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let live = match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice::<Envelope>(&bytes)
                    .map(|e| e.is_live(now))
                    .unwrap_or(false),
                Err(_) => continue,
            };
            if !live && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn io_err(path: &Path, e: io::Error) -> CacheError {
    CacheError::Unavailable(format!("{}: {e}", path.display()))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != io::ErrorKind::NotFound {
            debug!(path = %path.display(), error = %e, "could not remove cache file");
        }
    }
}

fn expiry(ttl: Duration) -> Result<DateTime<Utc>, CacheError> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|d| Utc::now().checked_add_signed(d))
        .ok_or_else(|| CacheError::Backend(format!("ttl {ttl:?} is out of range")))
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let Some(entry) = self.read_live(key).await? else {
            return Ok(None);
        };
        match STANDARD.decode(entry.payload.as_bytes()) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) => {
                warn!(key, error = %e, "discarding cache file with a corrupt payload");
                remove_quietly(&self.path_for(key)).await;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let entry = Envelope {
            expires_at: expiry(ttl)?,
            payload: STANDARD.encode(value),
        };
        let json =
            serde_json::to_vec(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_err(&self.dir, e))?;
        let path = self.path_for(key);
        // Unique temp name: two writers of the same key must not share it.
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        let tmp = PathBuf::from(tmp);
        if let Err(e) = tokio::fs::write(&tmp, &json).await {
            remove_quietly(&tmp).await;
            return Err(io_err(&tmp, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            remove_quietly(&tmp).await;
            return Err(io_err(&path, e));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path, e)),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.read_live(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_survive_a_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        FileCache::new(dir.path())
            .set("ocrflow:doc:abc", b"payload".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let reopened = FileCache::new(dir.path());
        assert_eq!(
            reopened.get("ocrflow:doc:abc").await.unwrap(),
            Some(b"payload".to_vec())
        );
        assert!(reopened.exists("ocrflow:doc:abc").await.unwrap());
    }

    #[tokio::test]
    async fn missing_directory_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("not-yet"));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.purge_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_file_is_never_served_and_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache
            .set("k", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!cache.exists("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.path_for("k").exists());
    }

    #[tokio::test]
    async fn overwrite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        for value in [b"old", b"new"] {
            cache
                .set("k", value.to_vec(), Duration::from_secs(60))
                .await
                .unwrap();
        }
        assert_eq!(cache.get("k").await.unwrap(), Some(b"new".to_vec()));
        assert!(cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
        // No temp files left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreadable_file_is_dropped_as_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        std::fs::write(cache.path_for("k"), b"not json").unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.path_for("k").exists());
    }

    #[tokio::test]
    async fn unrepresentable_ttl_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let err = cache
            .set("k", b"v".to_vec(), Duration::from_secs(u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Backend(_)));
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_counts_expired_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        cache
            .set("short", b"v".to_vec(), Duration::from_millis(5))
            .await
            .unwrap();
        cache
            .set("long", b"v".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.exists("long").await.unwrap());
    }
}
