use crate::cache::{create_cache, Cache};
use crate::config::{BrokerConfig, HttpConfig};
use crate::credentials::{CredentialManager, ServiceIdentity};
use crate::errors::AuthError;
use crate::grant::GrantService;
use crate::jwt::JwtVerifier;
use crate::keys::TenantKeyResolver;
use crate::registry::{
    HttpClientRegistry, HttpTenantRegistry, RegistryError, StaticTenantRegistry, Tenant,
    TenantRegistry,
};
use crate::transport::HttpTransport;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<BrokerConfig>,
    pub cache: Cache,
    pub tenants: Arc<dyn TenantRegistry>,
    pub credentials: CredentialManager,
    pub verifier: JwtVerifier,
}

impl AppState {
    /// Client shared by every outbound call: token endpoint, registries and
    /// public keys
    pub fn create_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
        Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
    }

    pub async fn new(config: &BrokerConfig) -> Result<Self, std::io::Error> {
        let cache = create_cache(&config.cache)
            .await
            .map_err(|e| std::io::Error::other(format!("Failed to create cache: {e}")))?;
        Self::with_existing_cache(config, cache)
    }

    pub fn with_existing_cache(config: &BrokerConfig, cache: Cache) -> Result<Self, std::io::Error> {
        let client = Self::create_http_client(&config.http)
            .map_err(|e| std::io::Error::other(format!("Failed to create HTTP client: {e}")))?;

        let tenants: Arc<dyn TenantRegistry> = if config.static_tenants.trim().is_empty() {
            Arc::new(HttpTenantRegistry::new(
                client.clone(),
                config.tenants_url.clone(),
            ))
        } else {
            let table = config.static_tenant_table().map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
            })?;
            Arc::new(StaticTenantRegistry::new(table))
        };

        let grants = GrantService::new(
            Arc::new(HttpTransport::new(client.clone())),
            config.oauth.scope.clone(),
        );
        let service_identity = config
            .oauth
            .service_account()
            .map(|(username, password)| ServiceIdentity::new(username, password));
        let credentials = CredentialManager::new(
            cache.clone(),
            Arc::new(HttpClientRegistry::new(client.clone())),
            grants,
            config.application_id.clone(),
            service_identity,
        );
        let verifier = JwtVerifier::new(TenantKeyResolver::new(
            tenants.clone(),
            client,
            &config.keys,
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            cache,
            tenants,
            credentials,
            verifier,
        })
    }

    /// Resolves a raw tenant id through the tenant registry
    pub async fn resolve_tenant(&self, tenant_id: &str) -> Result<Tenant, AuthError> {
        self.tenants.resolve(tenant_id).await.map_err(|e| match e {
            RegistryError::NotFound(_) => AuthError::tenant_resolution(
                format!("No tenant found for id '{tenant_id}'"),
                Some(e.into()),
            ),
            e => AuthError::tenant_resolution(
                format!("Unable to resolve tenant '{tenant_id}'"),
                Some(e.into()),
            ),
        })
    }

    #[cfg(test)]
    pub fn for_testing(config: &BrokerConfig) -> Self {
        let cache = Cache::InMemory(
            crate::cache::memory::InMemoryCache::new(u64::from(config.cache.ttl), 16)
                .expect("Failed to create test cache"),
        );
        Self::with_existing_cache(config, cache).expect("Failed to create test state")
    }
}
