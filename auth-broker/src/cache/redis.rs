use super::{decode, encode, CacheBackend, CacheError};
use async_trait::async_trait;
use log::error;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};

/// Redis-backed credential store shared between broker instances.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    ttl_secs: u64,
}

async fn ping(connection: &ConnectionManager) -> Result<(), RedisError> {
    let mut connection = connection.clone();
    redis::cmd("PING")
        .query_async::<String>(&mut connection)
        .await
        .map(|_| ())
}

fn command_failed(operation: &str, key: &str, err: RedisError) -> CacheError {
    error!("Redis {} of '{}' failed: {}", operation, key, err);
    CacheError::Redis(err.to_string())
}

impl RedisCache {
    /// Connects to `redis_url` and verifies the connection with a PING
    pub async fn new(redis_url: &str, ttl_secs: u64) -> Result<Self, String> {
        let client = Client::open(redis_url).map_err(|e| format!("Invalid Redis URL: {e}"))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| format!("Failed to connect to Redis: {e}"))?;
        ping(&connection)
            .await
            .map_err(|e| format!("Redis did not answer PING: {e}"))?;

        Ok(Self {
            connection,
            ttl_secs,
        })
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        let encoded = encode(value)?;
        self.connection
            .clone()
            .set_ex::<_, _, ()>(key, encoded, self.ttl_secs)
            .await
            .map_err(|e| command_failed("SET", key, e))
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        let raw: Option<String> = self
            .connection
            .clone()
            .get(key)
            .await
            .map_err(|e| command_failed("GET", key, e))?;
        decode(raw)
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        self.connection
            .clone()
            .exists(key)
            .await
            .map_err(|e| command_failed("EXISTS", key, e))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.connection
            .clone()
            .del::<_, ()>(key)
            .await
            .map_err(|e| command_failed("DEL", key, e))
    }

    async fn health_check(&self) -> Result<(), String> {
        ping(&self.connection)
            .await
            .map_err(|e| format!("Redis health check failed: {e}"))
    }
}
