//! Per-tenant RSA public keys used to verify inbound JWTs

use crate::config::KeysConfig;
use crate::errors::AuthError;
use crate::registry::{RegistryError, TenantRegistry};
use jsonwebtoken::DecodingKey;
use log::{debug, info};
use moka::future::Cache as MokaCache;
use openssl::x509::X509;
use std::sync::Arc;

pub const PUBLIC_KEY_PATH: &str = "/apim/v2/publickey";

/// Resolves and caches the public key of each tenant.
///
/// Keys are fetched lazily from `{tenant base}/apim/v2/publickey`; failures are
/// never cached so the next verification retries the fetch.
#[derive(Clone)]
pub struct TenantKeyResolver {
    tenants: Arc<dyn TenantRegistry>,
    client: reqwest::Client,
    keys: MokaCache<String, Arc<DecodingKey>>,
}

impl TenantKeyResolver {
    pub fn new(
        tenants: Arc<dyn TenantRegistry>,
        client: reqwest::Client,
        config: &KeysConfig,
    ) -> Self {
        let mut builder = MokaCache::builder().max_capacity(config.capacity);
        if let Some(ttl) = config.time_to_live() {
            builder = builder.time_to_live(ttl);
        }
        Self {
            tenants,
            client,
            keys: builder.build(),
        }
    }

    /// Returns the tenant's public key, fetching it on a cache miss
    pub async fn public_key(&self, tenant_id: &str) -> Result<Arc<DecodingKey>, AuthError> {
        if let Some(key) = self.keys.get(tenant_id).await {
            return Ok(key);
        }

        let key = Arc::new(self.fetch(tenant_id).await?);
        self.keys.insert(tenant_id.to_string(), key.clone()).await;
        info!("Cached public key for tenant '{}'", tenant_id);
        Ok(key)
    }

    /// Drops the cached key of one tenant, e.g. after a key rotation
    pub async fn invalidate(&self, tenant_id: &str) {
        self.keys.invalidate(tenant_id).await;
    }

    pub fn invalidate_all(&self) {
        self.keys.invalidate_all();
    }

    async fn fetch(&self, tenant_id: &str) -> Result<DecodingKey, AuthError> {
        let tenant = self.tenants.resolve(tenant_id).await.map_err(|e| match e {
            RegistryError::NotFound(_) => AuthError::tenant_resolution(
                format!("No tenant found for id '{tenant_id}'"),
                Some(e.into()),
            ),
            e => AuthError::tenant_resolution(
                format!("Unable to resolve tenant '{tenant_id}'"),
                Some(e.into()),
            ),
        })?;
        if tenant.base_url.is_empty() {
            return Err(AuthError::tenant_resolution(
                format!("Tenant '{tenant_id}' has no base URL"),
                None,
            ));
        }

        let url = format!("{}{}", tenant.base_url.trim_end_matches('/'), PUBLIC_KEY_PATH);
        debug!("Fetching public key for tenant '{}' from {}", tenant_id, url);

        let fetch_error = |e: reqwest::Error| {
            AuthError::key_fetch(
                format!("Unable to fetch public key for tenant '{tenant_id}'"),
                Some(e.into()),
            )
        };
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(fetch_error)?;
        let body = response.text().await.map_err(fetch_error)?;

        if body.trim().is_empty() {
            return Err(AuthError::key_fetch(
                format!("Public key not found for tenant '{tenant_id}'"),
                None,
            ));
        }
        parse_certificate_key(&body)
    }
}

/// Extracts the RSA public key of an X.509 certificate given as PEM or as bare
/// base64 DER
pub fn parse_certificate_key(text: &str) -> Result<DecodingKey, AuthError> {
    let text = text.trim();
    let certificate = if text.contains("-----BEGIN") {
        X509::from_pem(text.as_bytes())
            .map_err(|e| AuthError::key_parse("Invalid PEM certificate", e))?
    } else {
        use base64::Engine;
        let compact: String = text.split_whitespace().collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(compact)
            .map_err(|e| AuthError::key_parse("Certificate is not valid base64", e))?;
        X509::from_der(&der).map_err(|e| AuthError::key_parse("Invalid DER certificate", e))?
    };

    let rsa = certificate
        .public_key()
        .and_then(|key| key.rsa())
        .map_err(|e| AuthError::key_parse("Certificate does not carry an RSA public key", e))?;
    Ok(DecodingKey::from_rsa_raw_components(
        &rsa.n().to_vec(),
        &rsa.e().to_vec(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use crate::registry::StaticTenantRegistry;
    use crate::test_utils::test_keys;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(server: &MockServer) -> TenantKeyResolver {
        let tenants = StaticTenantRegistry::new(vec![("acme-corp".to_string(), server.uri())]);
        TenantKeyResolver::new(
            Arc::new(tenants),
            reqwest::Client::new(),
            &KeysConfig::default(),
        )
    }

    async fn mount_key(server: &MockServer, body: String, expected_calls: u64) {
        Mock::given(method("GET"))
            .and(path(PUBLIC_KEY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(expected_calls)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_key_fetched_once_per_tenant() {
        let server = MockServer::start().await;
        mount_key(&server, test_keys().certificate_pem.clone(), 1).await;
        let resolver = resolver(&server);

        resolver.public_key("acme-corp").await.expect("first fetch");
        resolver.public_key("acme-corp").await.expect("cached fetch");
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let server = MockServer::start().await;
        mount_key(&server, test_keys().certificate_der_base64.clone(), 2).await;
        let resolver = resolver(&server);

        resolver.public_key("acme-corp").await.expect("first fetch");
        resolver.invalidate("acme-corp").await;
        resolver.public_key("acme-corp").await.expect("refetch");
    }

    #[tokio::test]
    async fn test_empty_body_is_key_fetch_error() {
        let server = MockServer::start().await;
        mount_key(&server, String::new(), 2).await;
        let resolver = resolver(&server);

        for _ in 0..2 {
            let err = resolver
                .public_key("acme-corp")
                .await
                .err()
                .expect("key fetch should fail");
            assert_eq!(err.kind(), ErrorKind::KeyFetch);
        }
    }

    #[tokio::test]
    async fn test_garbage_certificate_is_key_parse_error() {
        let server = MockServer::start().await;
        mount_key(&server, "definitely not a certificate".to_string(), 1).await;
        let resolver = resolver(&server);

        let err = resolver
            .public_key("acme-corp")
            .await
            .err()
            .expect("key parse should fail");
        assert_eq!(err.kind(), ErrorKind::KeyParse);
    }

    #[tokio::test]
    async fn test_unknown_tenant_is_resolution_error() {
        let server = MockServer::start().await;
        let resolver = resolver(&server);

        let err = resolver
            .public_key("other-corp")
            .await
            .err()
            .expect("unknown tenant should fail");
        assert_eq!(err.kind(), ErrorKind::TenantResolution);
    }
}
