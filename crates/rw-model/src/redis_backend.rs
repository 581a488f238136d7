//! Redis key/value backend.

use crate::backend::KvClient;
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use log::{debug, info, warn};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Connection settings for [`RedisKvClient`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `host:port` of the server.
    pub address: String,
    pub db: u8,
}

impl RedisConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            db: 0,
        }
    }

    pub fn with_db(mut self, db: u8) -> Self {
        self.db = db;
        self
    }

    fn uri(&self) -> String {
        format!("redis://{}/{}", self.address, self.db)
    }
}

/// [`KvClient`] backed by a Redis server through a reconnecting connection
/// manager.
#[derive(Clone)]
pub struct RedisKvClient {
    config: RedisConfig,
    connection: ConnectionManager,
}

impl RedisKvClient {
    pub async fn connect(config: RedisConfig) -> StoreResult<Self> {
        let uri = config.uri();

        let client = redis::Client::open(uri.clone())
            .map_err(|e| StoreError::backend("connect", format!("{}: {}", uri, e)))?;

        let connection = client.get_connection_manager().await.map_err(|e| {
            StoreError::backend("connect", format!("Failed to create connection manager: {}", e))
        })?;

        info!("Connected to Redis: {} (db={})", config.address, config.db);
        Ok(Self { config, connection })
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait]
impl KvClient for RedisKvClient {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| StoreError::backend("get", format!("GET {} failed: {}", key, e)))?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        debug!("SET {} ({} bytes)", key, value.len());
        let _: () = conn
            .set(key, value)
            .await
            .map_err(|e| StoreError::backend("put", format!("SET {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        debug!("DEL {}", key);
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StoreError::backend("delete", format!("DEL {} failed: {}", key, e)))?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut conn = self.connection.clone();
        let pattern = format!("{}*", prefix);

        let mut keys: Vec<String> = conn
            .keys(&pattern)
            .await
            .map_err(|e| StoreError::backend("list", format!("KEYS {} failed: {}", pattern, e)))?;
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let value: Option<Vec<u8>> = conn
                .get(&key)
                .await
                .map_err(|e| StoreError::backend("list", format!("GET {} failed: {}", key, e)))?;
            // Deleted between KEYS and GET.
            if let Some(value) = value {
                entries.push((key, value));
            }
        }

        debug!("Listed {} keys under {}", entries.len(), prefix);
        Ok(entries)
    }

    async fn is_alive(&self) -> bool {
        let mut conn = self.connection.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis liveness check failed: {}", e);
                false
            }
        }
    }
}
