//! Redis-backed cache shared between processes.
//!
//! Expiry is delegated to Redis (`SET key value PX ttl`), so an elapsed entry
//! simply no longer exists.

use super::CacheBackend;
use crate::error::CacheError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError};
use std::time::Duration;

pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| CacheError::Unavailable(format!("invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client).await.map_err(map_err)?;
        Ok(Self { conn })
    }
}

/// TTL in milliseconds, or `None` when it is below Redis' 1ms resolution.
fn ttl_millis(ttl: Duration) -> Result<Option<u64>, CacheError> {
    let millis = u64::try_from(ttl.as_millis())
        .map_err(|_| CacheError::Backend(format!("ttl {ttl:?} is out of range")))?;
    Ok((millis > 0).then_some(millis))
}

fn map_err(e: RedisError) -> CacheError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
    {
        CacheError::Unavailable(e.to_string())
    } else {
        CacheError::Backend(e.to_string())
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<Vec<u8>>>(key).await.map_err(map_err)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        match ttl_millis(ttl)? {
            Some(millis) => conn
                .pset_ex::<_, _, ()>(key, value, millis)
                .await
                .map_err(map_err),
            // Already expired: drop any older value instead of storing this one.
            None => conn.del::<_, ()>(key).await.map_err(map_err),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn.clone();
        conn.exists::<_, bool>(key).await.map_err(map_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_millisecond_ttl_is_not_rounded_up() {
        assert_eq!(ttl_millis(Duration::ZERO).unwrap(), None);
        assert_eq!(ttl_millis(Duration::from_micros(900)).unwrap(), None);
        assert_eq!(ttl_millis(Duration::from_millis(250)).unwrap(), Some(250));
    }

    #[test]
    fn oversized_ttl_is_a_backend_error() {
        let err = ttl_millis(Duration::from_secs(u64::MAX)).unwrap_err();
        assert!(matches!(err, CacheError::Backend(_)));
    }
}
