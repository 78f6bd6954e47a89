//! Tenant and client registries the broker depends on
//!
//! Only the interface boundary matters to the rest of the crate; each trait
//! has one HTTP backed implementation plus, for tenants, a fixed table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod http;
pub mod table;

pub use http::{HttpClientRegistry, HttpTenantRegistry};
pub use table::StaticTenantRegistry;

/// A tenant as resolved by the tenant registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub code: String,
    pub base_url: String,
}

impl Tenant {
    pub fn new(code: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            base_url: base_url.into(),
        }
    }
}

/// Throttling tier of a client registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClientTier {
    #[default]
    Unlimited,
    #[serde(other)]
    Other,
}

/// Body of a client registration request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRequest {
    pub name: String,
    pub description: String,
    pub tier: ClientTier,
}

/// A provisioned OAuth2 client
#[derive(Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub name: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    #[serde(default)]
    pub tier: ClientTier,
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("name", &self.name)
            .field("consumer_key", &self.consumer_key)
            .field("consumer_secret", &"<redacted>")
            .field("tier", &self.tier)
            .finish()
    }
}

/// Credentials presented to the client registry
#[derive(Clone, PartialEq)]
pub struct RegistryAuth {
    pub username: String,
    pub password: String,
}

impl RegistryAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Errors that can occur during registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already registered: {0}")]
    Conflict(String),
    #[error("API response error: {0}")]
    ApiError(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

#[async_trait]
pub trait TenantRegistry: Send + Sync {
    /// Resolves a tenant id; unknown ids yield [`RegistryError::NotFound`]
    async fn resolve(&self, tenant_id: &str) -> Result<Tenant, RegistryError>;
}

#[async_trait]
pub trait ClientRegistry: Send + Sync {
    async fn create(
        &self,
        tenant: &Tenant,
        auth: &RegistryAuth,
        request: &ClientRequest,
    ) -> Result<ClientRegistration, RegistryError>;

    async fn delete(
        &self,
        tenant: &Tenant,
        auth: &RegistryAuth,
        name: &str,
    ) -> Result<(), RegistryError>;
}
