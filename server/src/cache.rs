use std::fmt;

use anyhow::Error as AnyError;
use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};

/// Cache failures the persistence tier cares about. Connection loss flips
/// the tier's ready bit; anything else is logged and retried on the next
/// scheduled persist.
#[derive(Debug)]
pub enum CacheError {
    ConnectionLost,
    Other(AnyError),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::ConnectionLost => f.write_str("cache connection lost"),
            CacheError::Other(err) => write!(f, "cache error: {err}"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Fast key-value tier for live document state. Values are base64 text,
/// one key per document.
#[async_trait]
pub trait SnapshotCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

pub fn state_key(document_id: &str) -> String {
    format!("doc:{document_id}:state")
}

/// Redis-backed cache. The connection manager reconnects on its own; the
/// error classification below tells the persistence tier when it is worth
/// flipping to the durable path in the meantime.
pub struct RedisSnapshotCache {
    conn: ConnectionManager,
}

impl RedisSnapshotCache {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|err| anyhow::anyhow!("invalid REDIS_URL: {err}"))?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    fn classify(err: redis::RedisError) -> CacheError {
        if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
            CacheError::ConnectionLost
        } else {
            CacheError::Other(err.into())
        }
    }
}

#[async_trait]
impl SnapshotCache for RedisSnapshotCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(Self::classify)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(Self::classify)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(Self::classify)
    }
}
