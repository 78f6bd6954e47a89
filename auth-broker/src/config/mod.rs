pub use crate::config::cache::{CacheConfig, CacheStore, InMemoryConfig, RedisConfig};
pub use crate::config::keys::KeysConfig;
pub use crate::config::oauth::{HttpConfig, OAuthConfig};
use config::{Config as ConfigCrate, ConfigError};
use serde::Deserialize;

pub mod cache;
pub mod keys;
pub mod oauth;

const ENV_PREFIX: &str = "BROKER";

/// Main configuration structure for the broker
///
/// Loaded from `BROKER_`-prefixed environment variables; nested sections use a
/// double underscore, e.g. `BROKER_CACHE__STORE=redis` or
/// `BROKER_OAUTH__SERVICE_USERNAME=svc`.
#[derive(Debug, Deserialize, Clone)]
pub struct BrokerConfig {
    /// The port the broker listens on (default: 7780)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application id used to namespace cached credentials and the client
    /// registrations provisioned for them
    #[serde(default = "default_application_id")]
    pub application_id: String,

    /// Base URL of the tenant registry
    #[serde(default)]
    pub tenants_url: String,

    /// Fixed tenant table, `id=base-url` pairs separated by commas. When set it
    /// replaces the remote tenant registry.
    #[serde(default)]
    pub static_tenants: String,

    #[serde(default)]
    pub oauth: OAuthConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub keys: KeysConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

fn default_port() -> u16 {
    7780
}

fn default_application_id() -> String {
    "auth-broker".to_string()
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            application_id: default_application_id(),
            tenants_url: String::new(),
            static_tenants: String::new(),
            oauth: OAuthConfig::default(),
            http: HttpConfig::default(),
            keys: KeysConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl BrokerConfig {
    /// Creates a new config from the process environment
    pub fn new() -> Result<Self, String> {
        Self::from_source(None)
    }

    /// Creates a config from an explicit variable map instead of the process
    /// environment
    pub fn from_source(source: Option<config::Map<String, String>>) -> Result<Self, String> {
        ConfigCrate::builder()
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(source),
            )
            .build()
            .map_err(|e: ConfigError| e.to_string())?
            .try_deserialize()
            .map_err(|e| e.to_string())
    }

    /// Parses `static_tenants` into `(tenant id, base url)` pairs
    pub fn static_tenant_table(&self) -> Result<Vec<(String, String)>, String> {
        self.static_tenants
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((id, url)) if !id.trim().is_empty() && !url.trim().is_empty() => {
                    Ok((id.trim().to_string(), url.trim().to_string()))
                }
                _ => Err(format!("Invalid static tenant entry '{entry}'")),
            })
            .collect()
    }

    #[cfg(test)]
    pub fn for_test_with_mock(tenant_mock: &wiremock::MockServer) -> Self {
        Self {
            port: 0,
            application_id: "test-app".to_string(),
            static_tenants: format!("acme-corp={}", tenant_mock.uri()),
            oauth: OAuthConfig {
                scope: Some("PRODUCTION".to_string()),
                service_username: "svc-broker".to_string(),
                service_password: "svc-secret".to_string(),
            },
            http: HttpConfig {
                request_timeout: 5,
                connect_timeout: 1,
            },
            cache: CacheConfig {
                ttl: 60,
                store: CacheStore::InMemory,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
