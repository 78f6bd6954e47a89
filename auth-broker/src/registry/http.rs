use super::{
    ClientRegistration, ClientRegistry, ClientRequest, RegistryAuth, RegistryError, Tenant,
    TenantRegistry,
};
use async_trait::async_trait;
use log::{debug, error};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Registry responses wrap their payload in a `result` field
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: T,
}

/// Appends percent-encoded path segments to `base`
fn join_segments(base: &str, segments: &[&str]) -> Result<String, RegistryError> {
    let mut url = url::Url::parse(base)
        .map_err(|e| RegistryError::Config(format!("Invalid base URL '{base}': {e}")))?;
    url.path_segments_mut()
        .map_err(|_| RegistryError::Config(format!("Base URL '{base}' cannot have a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

async fn parse_result<T: DeserializeOwned>(response: Response) -> Result<T, RegistryError> {
    let envelope: Envelope<T> = response
        .json()
        .await
        .map_err(|e| RegistryError::ApiError(format!("JSON parse error: {e}")))?;
    Ok(envelope.result)
}

async fn api_error(response: Response) -> RegistryError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    error!("Registry API error {}: {}", status, error_text);
    RegistryError::ApiError(format!("HTTP {}: {}", status, error_text))
}

/// Resolves tenants through `GET {tenants_url}/tenants/v2/{id}`.
///
/// Ids coming from assertion headers are in their header-safe spelling
/// (`acme-corp` for `acme.corp`); the registry is expected to accept it.
#[derive(Clone)]
pub struct HttpTenantRegistry {
    client: Client,
    tenants_url: String,
}

impl HttpTenantRegistry {
    pub fn new(client: Client, tenants_url: impl Into<String>) -> Self {
        Self {
            client,
            tenants_url: tenants_url.into(),
        }
    }
}

#[async_trait]
impl TenantRegistry for HttpTenantRegistry {
    async fn resolve(&self, tenant_id: &str) -> Result<Tenant, RegistryError> {
        if self.tenants_url.is_empty() {
            return Err(RegistryError::Config(
                "Tenant registry URL is not configured".to_string(),
            ));
        }
        let url = join_segments(&self.tenants_url, &["tenants", "v2", tenant_id])?;
        debug!("Resolving tenant '{}' from {}", tenant_id, url);

        let response = self.client.get(&url).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(tenant_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        parse_result(response).await
    }
}

/// Manages client registrations under `{tenant base}/clients/v2`
#[derive(Clone)]
pub struct HttpClientRegistry {
    client: Client,
}

impl HttpClientRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClientRegistry for HttpClientRegistry {
    async fn create(
        &self,
        tenant: &Tenant,
        auth: &RegistryAuth,
        request: &ClientRequest,
    ) -> Result<ClientRegistration, RegistryError> {
        let url = join_segments(&tenant.base_url, &["clients", "v2"])?;
        debug!("Registering client '{}' at {}", request.name, url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&auth.username, Some(&auth.password))
            .json(request)
            .send()
            .await?;
        if response.status() == StatusCode::CONFLICT {
            return Err(RegistryError::Conflict(request.name.clone()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        parse_result(response).await
    }

    async fn delete(
        &self,
        tenant: &Tenant,
        auth: &RegistryAuth,
        name: &str,
    ) -> Result<(), RegistryError> {
        let url = join_segments(&tenant.base_url, &["clients", "v2", name])?;
        debug!("Deleting client '{}' at {}", name, url);

        let response = self
            .client
            .delete(&url)
            .basic_auth(&auth.username, Some(&auth.password))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(name.to_string()));
        }
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}
