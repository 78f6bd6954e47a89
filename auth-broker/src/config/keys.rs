use serde::Deserialize;
use std::time::Duration;

/// Tenant public key cache configuration
#[derive(Debug, Deserialize, Clone)]
pub struct KeysConfig {
    /// Maximum number of tenant keys kept in memory (default: 1024)
    #[serde(default = "default_key_capacity")]
    pub capacity: u64,

    /// Seconds before a cached key is fetched again; 0 keeps keys until they
    /// are invalidated explicitly (default: 0)
    #[serde(default)]
    pub ttl: u64,
}

fn default_key_capacity() -> u64 {
    1024
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            capacity: default_key_capacity(),
            ttl: 0,
        }
    }
}

impl KeysConfig {
    pub fn time_to_live(&self) -> Option<Duration> {
        (self.ttl > 0).then(|| Duration::from_secs(self.ttl))
    }
}
