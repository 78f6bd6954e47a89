use serde::Deserialize;

/// Backend holding issued credentials (`BROKER_CACHE__STORE`)
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStore {
    #[default]
    InMemory,
    Redis,
    /// No caching at all
    None,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Lifetime of a cached credential in seconds (default: 1 day).
    ///
    /// Must outlive the issued access tokens, otherwise cached refresh tokens
    /// and client registrations are dropped before they can be reused.
    #[serde(default = "default_credential_ttl")]
    pub ttl: u32,

    #[serde(default)]
    pub store: CacheStore,

    #[serde(default)]
    pub memory: InMemoryConfig,

    #[serde(default)]
    pub redis: RedisConfig,
}

fn default_credential_ttl() -> u32 {
    24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: default_credential_ttl(),
            store: CacheStore::InMemory,
            memory: InMemoryConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InMemoryConfig {
    /// Upper bound for the encoded credentials, in MiB (default: 64)
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,
}

fn default_memory_capacity() -> usize {
    64
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://cache:6379/0`; required for the redis store
    #[serde(default)]
    pub url: String,
}
