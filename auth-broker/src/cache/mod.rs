use crate::config::{CacheConfig, CacheStore};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod null;
pub mod redis;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to encode cache entry: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to decode cache entry: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Invalid cache configuration: {0}")]
    Config(String),
}

/// Keyed store used for issued credentials.
///
/// Every backend serializes values to JSON so that a credential written by one
/// broker instance can be read back by another one sharing the same Redis.
/// Concurrent writers to the same key resolve as last-write-wins.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Stores `value` under `key` with the backend's TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
        -> Result<(), CacheError>;

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError>;

    /// Whether `key` is present, without decoding its value
    async fn contains(&self, key: &str) -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Checks connectivity to the backend.
    ///
    /// Redis pings the server, the in-process backends are always healthy.
    async fn health_check(&self) -> Result<(), String>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, CacheError> {
    raw.map(|raw| {
        serde_json::from_str(&raw).map_err(|e| CacheError::Deserialization(e.to_string()))
    })
    .transpose()
}

/// Credential store selected at startup from [`CacheConfig::store`].
#[derive(Clone)]
pub enum Cache {
    InMemory(memory::InMemoryCache),
    Redis(redis::RedisCache),
    /// Every lookup is a miss
    Null(null::NullCache),
}

impl Cache {
    /// Store name as spelled in `BROKER_CACHE__STORE`
    pub fn store_name(&self) -> &'static str {
        match self {
            Self::InMemory(_) => "in-memory",
            Self::Redis(_) => "redis",
            Self::Null(_) => "none",
        }
    }
}

macro_rules! dispatch {
    ($cache:expr, $backend:ident => $call:expr) => {
        match $cache {
            Cache::InMemory($backend) => $call,
            Cache::Redis($backend) => $call,
            Cache::Null($backend) => $call,
        }
    };
}

#[async_trait::async_trait]
impl CacheBackend for Cache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        dispatch!(self, backend => backend.set(key, value).await)
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        dispatch!(self, backend => backend.get(key).await)
    }

    async fn contains(&self, key: &str) -> Result<bool, CacheError> {
        dispatch!(self, backend => backend.contains(key).await)
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        dispatch!(self, backend => backend.delete(key).await)
    }

    async fn health_check(&self) -> Result<(), String> {
        dispatch!(self, backend => backend.health_check().await)
    }
}

/// Creates the credential cache selected by `config.store`.
///
/// Redis requires a non-empty URL and is pinged once before being returned, so
/// a misconfigured Redis fails at startup rather than on the first request.
pub async fn create_cache(config: &CacheConfig) -> Result<Cache, CacheError> {
    let ttl_secs = u64::from(config.ttl);
    match config.store {
        CacheStore::InMemory => memory::InMemoryCache::new(ttl_secs, config.memory.capacity)
            .map(Cache::InMemory)
            .map_err(CacheError::Config),
        CacheStore::Redis if config.redis.url.is_empty() => Err(CacheError::Config(
            "BROKER_CACHE__REDIS__URL must be set when the store is redis".to_string(),
        )),
        CacheStore::Redis => redis::RedisCache::new(&config.redis.url, ttl_secs)
            .await
            .map(Cache::Redis)
            .map_err(CacheError::Config),
        CacheStore::None => Ok(Cache::Null(null::NullCache)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use serde::{Deserialize, Serialize};

    /// Minimal stand-in for a stored credential
    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    pub(crate) struct StoredToken {
        pub subject: String,
        pub access_token: String,
    }

    impl StoredToken {
        pub(crate) fn new(subject: &str, access_token: &str) -> Self {
            Self {
                subject: subject.to_string(),
                access_token: access_token.to_string(),
            }
        }
    }

    fn memory_cache() -> Cache {
        Cache::InMemory(InMemoryCache::new(60, 16).expect("Failed to create cache"))
    }

    #[tokio::test]
    async fn test_store_lookup_and_delete() {
        let cache = memory_cache();
        let key = "credential:acme.corp/app/alice";
        let token = StoredToken::new("alice", "at-1");

        cache.set(key, &token).await.expect("Failed to store token");
        assert!(cache.contains(key).await.expect("contains failed"));
        assert_eq!(
            cache.get::<StoredToken>(key).await.expect("lookup failed"),
            Some(token)
        );

        cache.delete(key).await.expect("Failed to delete token");
        assert!(!cache.contains(key).await.expect("contains failed"));
        assert_eq!(
            cache.get::<StoredToken>(key).await.expect("lookup failed"),
            None
        );
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let cache = memory_cache();
        let key = "credential:acme.corp/app/alice";
        for access_token in ["at-1", "at-2"] {
            cache
                .set(key, &StoredToken::new("alice", access_token))
                .await
                .expect("Failed to store token");
        }

        let stored: StoredToken = cache
            .get(key)
            .await
            .expect("lookup failed")
            .expect("token missing");
        assert_eq!(stored.access_token, "at-2");
    }

    #[test]
    fn test_decode_reports_malformed_entries() {
        assert_eq!(decode::<StoredToken>(None).expect("decode failed"), None);
        assert!(matches!(
            decode::<StoredToken>(Some("\"not a token\"".to_string())),
            Err(CacheError::Deserialization(_))
        ));
    }

    #[tokio::test]
    async fn test_create_cache_from_config() {
        let config = CacheConfig::default();
        let cache = create_cache(&config).await.expect("Failed to create cache");
        assert!(matches!(cache, Cache::InMemory(_)));

        let config = CacheConfig {
            store: CacheStore::None,
            ..Default::default()
        };
        let cache = create_cache(&config).await.expect("Failed to create cache");
        assert!(matches!(cache, Cache::Null(_)));
    }

    #[tokio::test]
    async fn test_redis_requires_url() {
        let config = CacheConfig {
            store: CacheStore::Redis,
            ..Default::default()
        };
        assert!(matches!(
            create_cache(&config).await,
            Err(CacheError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_subjects_do_not_interfere() {
        let cache = memory_cache();
        let writers: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    let subject = format!("user-{i}");
                    let key = format!("credential:acme.corp/app/{subject}");
                    cache
                        .set(&key, &StoredToken::new(&subject, &format!("at-{i}")))
                        .await
                        .expect("Failed to store token");
                    let stored: StoredToken = cache
                        .get(&key)
                        .await
                        .expect("lookup failed")
                        .expect("token missing");
                    assert_eq!(stored.subject, subject);
                })
            })
            .collect();

        for writer in writers {
            writer.await.expect("writer panicked");
        }
    }
}
