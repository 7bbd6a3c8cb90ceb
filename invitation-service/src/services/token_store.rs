//! Pending raw tokens awaiting mail delivery.
//!
//! Entries live under `invitation_token_pending:<hashed_token>` with a TTL.
//! The store is best-effort: the relational row is authoritative.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub const PENDING_TOKEN_PREFIX: &str = "invitation_token_pending:";

pub fn pending_token_key(hashed_token: &str) -> String {
    format!("{}{}", PENDING_TOKEN_PREFIX, hashed_token)
}

#[async_trait]
pub trait PendingTokenStore: Send + Sync {
    /// Store the raw token for `hashed_token`, expiring after `ttl_seconds`.
    async fn put(&self, hashed_token: &str, raw_token: &str, ttl_seconds: u64)
        -> Result<(), anyhow::Error>;

    /// Read the raw token and push its expiry out by `ttl_seconds`.
    async fn take_for_delivery(
        &self,
        hashed_token: &str,
        ttl_seconds: u64,
    ) -> Result<Option<String>, anyhow::Error>;

    async fn remove(&self, hashed_token: &str) -> Result<(), anyhow::Error>;

    /// Remaining lifetime in seconds, `None` when absent.
    async fn ttl(&self, hashed_token: &str) -> Result<Option<i64>, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisTokenStore {
    manager: ConnectionManager,
}

impl RedisTokenStore {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self { manager })
    }
}

#[async_trait]
impl PendingTokenStore for RedisTokenStore {
    async fn put(
        &self,
        hashed_token: &str,
        raw_token: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(pending_token_key(hashed_token))
            .arg(raw_token)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to store pending token: {}", e))
    }

    async fn take_for_delivery(
        &self,
        hashed_token: &str,
        ttl_seconds: u64,
    ) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let key = pending_token_key(hashed_token);

        let (raw, _): (Option<String>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(&key)
            .cmd("EXPIRE")
            .arg(&key)
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read pending token: {}", e))?;

        Ok(raw)
    }

    async fn remove(&self, hashed_token: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(pending_token_key(hashed_token))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete pending token: {}", e))
    }

    async fn ttl(&self, hashed_token: &str) -> Result<Option<i64>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl: i64 = redis::cmd("TTL")
            .arg(pending_token_key(hashed_token))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read pending token TTL: {}", e))?;

        // -2 means the key does not exist
        Ok((ttl != -2).then_some(ttl))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-process store for tests and local runs without Redis.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Instant)>>, anyhow::Error> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("token store lock poisoned"))
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|(_, exp)| *exp > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw values of every live entry.
    pub fn values(&self) -> Vec<String> {
        let now = Instant::now();
        self.entries
            .lock()
            .map(|entries| {
                entries
                    .values()
                    .filter(|(_, exp)| *exp > now)
                    .map(|(raw, _)| raw.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl PendingTokenStore for MemoryTokenStore {
    async fn put(
        &self,
        hashed_token: &str,
        raw_token: &str,
        ttl_seconds: u64,
    ) -> Result<(), anyhow::Error> {
        let expires = Instant::now() + Duration::from_secs(ttl_seconds.max(1));
        self.lock()?.insert(
            pending_token_key(hashed_token),
            (raw_token.to_string(), expires),
        );
        Ok(())
    }

    async fn take_for_delivery(
        &self,
        hashed_token: &str,
        ttl_seconds: u64,
    ) -> Result<Option<String>, anyhow::Error> {
        let now = Instant::now();
        let mut entries = self.lock()?;
        let key = pending_token_key(hashed_token);
        match entries.get_mut(&key) {
            Some((raw, expires)) if *expires > now => {
                *expires = now + Duration::from_secs(ttl_seconds.max(1));
                Ok(Some(raw.clone()))
            }
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, hashed_token: &str) -> Result<(), anyhow::Error> {
        self.lock()?.remove(&pending_token_key(hashed_token));
        Ok(())
    }

    async fn ttl(&self, hashed_token: &str) -> Result<Option<i64>, anyhow::Error> {
        let now = Instant::now();
        Ok(self
            .lock()?
            .get(&pending_token_key(hashed_token))
            .filter(|(_, expires)| *expires > now)
            .map(|(_, expires)| expires.duration_since(now).as_secs() as i64))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
