//! Document cache: skip OCR and refinement for sources already processed.
//!
//! Two layers:
//!
//! * [`CacheBackend`]: raw key/value storage with TTL (in-process
//!   [`MemoryCache`], on-disk [`FileCache`], or `RedisCache` with the
//!   `redis` feature).
//! * [`DocumentCache`]: what the orchestrator talks to. It serialises
//!   [`Document`]s, turns backend failures into [`CacheLookup::Degraded`]
//!   instead of errors, and drops payloads it cannot decode.
//!
//! Keys come from [`derive_key`]: a BLAKE3 hash of the source file's bytes or
//! of its path, never of anything the pipeline produces, so reprocessing the
//! same source always lands on the same entry.

mod file;
mod memory;
#[cfg(feature = "redis")]
mod redis_cache;

pub use file::FileCache;
pub use memory::MemoryCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

use crate::config::CacheKeyMode;
use crate::document::Document;
use crate::error::CacheError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Namespace for every key written by this crate.
pub const KEY_PREFIX: &str = "ocrflow:doc:";

/// Key/value storage with per-entry expiry.
///
/// Implementations must never return an entry whose TTL has elapsed.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// `Ok(None)` is a miss, not an error.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// `true` if an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
}

/// Result of looking a document up.
#[derive(Debug)]
pub enum CacheLookup {
    Hit(Document),
    Miss,
    /// The backend failed; callers should proceed as on a miss.
    Degraded(CacheError),
}

/// Typed document cache over a [`CacheBackend`].
#[derive(Clone)]
pub struct DocumentCache {
    backend: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl DocumentCache {
    /// `ttl` applies to [`store`](Self::store); see also
    /// [`store_with_ttl`](Self::store_with_ttl).
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn lookup(&self, key: &str) -> CacheLookup {
        let bytes = match self.backend.get(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return CacheLookup::Miss,
            Err(e) => return CacheLookup::Degraded(e),
        };
        match serde_json::from_slice::<Document>(&bytes) {
            Ok(doc) => CacheLookup::Hit(doc),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                if let Err(e) = self.backend.delete(key).await {
                    debug!(key, error = %e, "could not delete undecodable cache entry");
                }
                CacheLookup::Miss
            }
        }
    }

    pub async fn store(&self, key: &str, doc: &Document) -> Result<(), CacheError> {
        self.store_with_ttl(key, doc, self.ttl).await
    }

    pub async fn store_with_ttl(
        &self,
        key: &str,
        doc: &Document,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes =
            serde_json::to_vec(doc).map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.backend.set(key, bytes, ttl).await
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.delete(key).await
    }

    pub async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        self.backend.exists(key).await
    }
}

/// Cache key for raw source bytes.
pub fn key_for_bytes(bytes: &[u8]) -> String {
    format!("{KEY_PREFIX}{}", blake3::hash(bytes).to_hex())
}

/// Cache key for a source identifier (path or URL).
pub fn key_for_source(source: &str) -> String {
    format!("{KEY_PREFIX}{}", blake3::hash(source.as_bytes()).to_hex())
}

/// Derive the cache key for `source`.
///
/// In [`CacheKeyMode::Content`] a readable local file is hashed by content;
/// URLs and unreadable paths fall back to the path key. In
/// [`CacheKeyMode::Path`] local paths are canonicalised first so `./a.pdf`
/// and `a.pdf` share one entry.
pub async fn derive_key(source: &str, mode: CacheKeyMode) -> String {
    if is_remote(source) {
        return key_for_source(source);
    }
    match mode {
        CacheKeyMode::Content => match hash_file(source).await {
            Ok(hex) => format!("{KEY_PREFIX}{hex}"),
            Err(e) => {
                debug!(source, error = %e, "content hash unavailable, keying by path");
                key_for_source(&canonical(source).await)
            }
        },
        CacheKeyMode::Path => key_for_source(&canonical(source).await),
    }
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

async fn canonical(source: &str) -> String {
    tokio::fs::canonicalize(source)
        .await
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| source.to_string())
}

async fn hash_file(path: &str) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Page;
    use std::io::Write;

    struct Broken;

    #[async_trait]
    impl CacheBackend for Broken {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _k: &str, _v: Vec<u8>, _t: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
        async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("connection refused".into()))
        }
    }

    fn sample() -> Document {
        Document::assemble("a.pdf", vec![Page::new(1, "hello"), Page::new(2, "world")]).unwrap()
    }

    #[tokio::test]
    async fn store_then_lookup_round_trips() {
        let cache = DocumentCache::new(Arc::new(MemoryCache::new()), Duration::from_secs(60));
        let doc = sample();
        cache.store("k", &doc).await.unwrap();
        match cache.lookup("k").await {
            CacheLookup::Hit(found) => assert_eq!(found, doc),
            other => panic!("expected hit, got {other:?}"),
        }
        assert!(cache.contains("k").await.unwrap());
        assert!(cache.invalidate("k").await.unwrap());
        assert!(matches!(cache.lookup("k").await, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn backend_failure_is_degraded_not_error() {
        let cache = DocumentCache::new(Arc::new(Broken), Duration::from_secs(60));
        assert!(matches!(
            cache.lookup("k").await,
            CacheLookup::Degraded(CacheError::Unavailable(_))
        ));
        assert!(cache.store("k", &sample()).await.is_err());
    }

    #[tokio::test]
    async fn oversized_ttl_fails_the_store_instead_of_panicking() {
        let cache = DocumentCache::new(
            Arc::new(MemoryCache::new()),
            Duration::from_secs(u64::MAX),
        );
        let err = cache.store("k", &sample()).await.unwrap_err();
        assert!(matches!(err, CacheError::Backend(_)));
        assert!(matches!(cache.lookup("k").await, CacheLookup::Miss));
    }

    #[tokio::test]
    async fn undecodable_payload_is_dropped() {
        let backend = Arc::new(MemoryCache::new());
        backend
            .set("k", b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        let cache = DocumentCache::new(backend.clone(), Duration::from_secs(60));
        assert!(matches!(cache.lookup("k").await, CacheLookup::Miss));
        assert!(!backend.exists("k").await.unwrap());
    }

    #[test]
    fn keys_are_deterministic_and_prefixed() {
        let a = key_for_source("/data/a.pdf");
        assert_eq!(a, key_for_source("/data/a.pdf"));
        assert_ne!(a, key_for_source("/data/b.pdf"));
        assert!(a.starts_with(KEY_PREFIX));
        assert_eq!(a.len(), KEY_PREFIX.len() + 64);
    }

    #[tokio::test]
    async fn content_key_ignores_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.pdf");
        let b = dir.path().join("b.pdf");
        for p in [&a, &b] {
            let mut f = std::fs::File::create(p).unwrap();
            f.write_all(b"%PDF-1.7 same bytes").unwrap();
        }
        let ka = derive_key(a.to_str().unwrap(), CacheKeyMode::Content).await;
        let kb = derive_key(b.to_str().unwrap(), CacheKeyMode::Content).await;
        assert_eq!(ka, kb);
        assert_eq!(ka, key_for_bytes(b"%PDF-1.7 same bytes"));

        let pa = derive_key(a.to_str().unwrap(), CacheKeyMode::Path).await;
        let pb = derive_key(b.to_str().unwrap(), CacheKeyMode::Path).await;
        assert_ne!(pa, pb);
    }

    #[tokio::test]
    async fn missing_file_and_urls_key_by_source() {
        let missing = derive_key("/no/such/file.pdf", CacheKeyMode::Content).await;
        assert_eq!(missing, key_for_source("/no/such/file.pdf"));
        let url = "https://example.org/doc.pdf";
        assert_eq!(derive_key(url, CacheKeyMode::Content).await, key_for_source(url));
    }
}
