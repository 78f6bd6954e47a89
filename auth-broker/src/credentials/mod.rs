//! Credential lifecycle: one cached OAuth2 credential per tenant and subject
//!
//! A credential is issued through a client registration provisioned for the
//! subject, served from the cache while it is fresh, refreshed (or re-issued
//! when the refresh fails) once stale, and revoked on request.

use crate::cache::{Cache, CacheBackend, CacheError};
use crate::errors::AuthError;
use crate::grant::{Grant, GrantService};
use crate::registry::{
    ClientRegistration, ClientRegistry, ClientRequest, ClientTier, RegistryAuth, RegistryError,
    Tenant,
};
use crate::transport::AccessToken;
use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

pub mod blocking;

pub use blocking::BlockingCredentialManager;

/// An issued OAuth2 credential together with the client it was issued to
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub tenant_id: String,
    pub subject: String,
    pub client_key: String,
    pub client_secret: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Lifetime in seconds granted by the token endpoint
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    fn issue(
        tenant: &Tenant,
        subject: &str,
        registration: ClientRegistration,
        token: AccessToken,
    ) -> Self {
        let mut credential = Self {
            tenant_id: tenant.code.clone(),
            subject: subject.to_string(),
            client_key: registration.consumer_key,
            client_secret: registration.consumer_secret,
            access_token: String::new(),
            refresh_token: None,
            expires_in: 0,
            expires_at: Utc::now(),
        };
        credential.apply_token(token);
        credential
    }

    /// Replaces the token fields; a refresh response without a refresh token
    /// keeps the previous one
    fn apply_token(&mut self, token: AccessToken) {
        let issued_at = Utc::now();
        self.access_token = token.access_token;
        self.refresh_token = token.refresh_token.or_else(|| self.refresh_token.take());
        self.expires_in = token.expires_in;
        self.expires_at = TimeDelta::try_seconds(token.expires_in)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .unwrap_or(issued_at);
    }

    /// Whole seconds until expiry; zero or less means stale
    pub fn remaining_seconds(&self) -> i64 {
        self.expires_at.signed_duration_since(Utc::now()).num_seconds()
    }

    pub fn is_stale(&self) -> bool {
        self.remaining_seconds() <= 0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("tenant_id", &self.tenant_id)
            .field("subject", &self.subject)
            .field("client_key", &self.client_key)
            .field("access_token", &token_fingerprint(&self.access_token))
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Username and password of the subject, for direct-mode credentials
#[derive(Clone, PartialEq)]
pub struct PasswordProof {
    pub username: String,
    pub password: String,
}

impl PasswordProof {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for PasswordProof {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordProof")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Service account allowed to obtain tokens on behalf of other users
#[derive(Clone, PartialEq)]
pub struct ServiceIdentity {
    pub username: String,
    pub password: String,
}

impl ServiceIdentity {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// How a credential is obtained
#[derive(Debug, Clone, Copy)]
enum AuthMode<'a> {
    /// The subject's own username and password
    Direct(&'a PasswordProof),
    /// The service identity acting for the subject
    Impersonation(&'a ServiceIdentity),
}

impl AuthMode<'_> {
    fn grant(&self, subject: &str) -> Grant {
        match self {
            Self::Direct(proof) => Grant::Password {
                username: proof.username.clone(),
                password: proof.password.clone(),
            },
            Self::Impersonation(service) => Grant::Impersonation {
                service_username: service.username.clone(),
                service_password: service.password.clone(),
                token_username: subject.to_string(),
            },
        }
    }

    fn registry_auth(&self) -> RegistryAuth {
        match self {
            Self::Direct(proof) => RegistryAuth::new(&proof.username, &proof.password),
            Self::Impersonation(service) => {
                RegistryAuth::new(&service.username, &service.password)
            }
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::Direct(_) => "delegated credential caching",
            Self::Impersonation(_) => "impersonation credential caching",
        }
    }
}

/// Truncated SHA-256 of a token, safe to log
pub fn token_fingerprint(token: &str) -> String {
    Sha256::digest(token.as_bytes())
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Issues, caches, renews and revokes credentials
#[derive(Clone)]
pub struct CredentialManager {
    cache: Cache,
    clients: Arc<dyn ClientRegistry>,
    grants: GrantService,
    application_id: String,
    service_identity: Option<ServiceIdentity>,
}

impl CredentialManager {
    pub fn new(
        cache: Cache,
        clients: Arc<dyn ClientRegistry>,
        grants: GrantService,
        application_id: impl Into<String>,
        service_identity: Option<ServiceIdentity>,
    ) -> Self {
        Self {
            cache,
            clients,
            grants,
            application_id: application_id.into(),
            service_identity,
        }
    }

    pub fn grants(&self) -> &GrantService {
        &self.grants
    }

    /// Name of the client registration provisioned for `subject`
    pub fn client_name(&self, tenant: &Tenant, subject: &str) -> String {
        format!("{}/{}/{}", tenant.code, self.application_id, subject)
    }

    fn cache_key(&self, tenant: &Tenant, subject: &str) -> String {
        format!("credential:{}", self.client_name(tenant, subject))
    }

    fn mode<'a>(&'a self, proof: Option<&'a PasswordProof>) -> Result<AuthMode<'a>, AuthError> {
        match proof {
            Some(proof) => Ok(AuthMode::Direct(proof)),
            None => self
                .service_identity
                .as_ref()
                .map(AuthMode::Impersonation)
                .ok_or_else(|| {
                    AuthError::InvalidInput(
                        "No service identity configured for impersonation".to_string(),
                    )
                }),
        }
    }

    fn validate(tenant: &Tenant, subject: &str) -> Result<(), AuthError> {
        if tenant.base_url.trim().is_empty() {
            return Err(AuthError::tenant_resolution(
                format!("Tenant '{}' has no base URL", tenant.code),
                None,
            ));
        }
        if subject.trim().is_empty() {
            return Err(AuthError::InvalidInput(
                "Subject must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    async fn cached(&self, key: &str) -> Result<Option<Credential>, AuthError> {
        match self.cache.get::<Credential>(key).await {
            Ok(credential) => Ok(credential),
            Err(CacheError::Deserialization(e)) => {
                warn!("Discarding undecodable cached credential '{}': {}", key, e);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns a usable credential for `subject`, issuing, refreshing or
    /// re-issuing it as needed.
    ///
    /// With `proof` the credential is obtained with the subject's own password,
    /// without it the configured service identity impersonates the subject.
    pub async fn obtain_credential(
        &self,
        tenant: &Tenant,
        subject: &str,
        proof: Option<&PasswordProof>,
    ) -> Result<Credential, AuthError> {
        Self::validate(tenant, subject)?;
        let mode = self.mode(proof)?;
        let key = self.cache_key(tenant, subject);

        let credential = match self.cached(&key).await? {
            None => self.issue(tenant, subject, mode).await?,
            Some(credential) if !credential.is_stale() => {
                debug!("Using cached credential for '{}'", key);
                return Ok(credential);
            }
            Some(credential) => self.renew(tenant, subject, mode, credential).await?,
        };

        if credential.is_stale() {
            return Err(AuthError::TokenRequest {
                message: format!(
                    "Token endpoint returned an expired token for '{}'",
                    credential.subject
                ),
                source: None,
            });
        }
        self.cache.set(&key, &credential).await?;
        Ok(credential)
    }

    async fn issue(
        &self,
        tenant: &Tenant,
        subject: &str,
        mode: AuthMode<'_>,
    ) -> Result<Credential, AuthError> {
        let registration = self.provision(tenant, subject, mode).await?;
        let token = self
            .grants
            .request_token(
                &tenant.base_url,
                &registration.consumer_key,
                &registration.consumer_secret,
                &mode.grant(subject),
            )
            .await
            .map_err(|e| {
                AuthError::token_request(format!("Unable to obtain a token for '{subject}'"), e)
            })?;

        info!(
            "Issued credential for '{}' in tenant '{}'",
            subject, tenant.code
        );
        Ok(Credential::issue(tenant, subject, registration, token))
    }

    async fn provision(
        &self,
        tenant: &Tenant,
        subject: &str,
        mode: AuthMode<'_>,
    ) -> Result<ClientRegistration, AuthError> {
        let auth = mode.registry_auth();
        let request = ClientRequest {
            name: self.client_name(tenant, subject),
            description: mode.description().to_string(),
            tier: ClientTier::Unlimited,
        };
        let provisioning_error = |e: RegistryError| {
            AuthError::provisioning(
                format!("Unable to register client application '{}'", request.name),
                e,
            )
        };

        match self.clients.create(tenant, &auth, &request).await {
            Ok(registration) => Ok(registration),
            Err(RegistryError::Conflict(name)) => {
                info!("Replacing existing client registration '{}'", name);
                match self.clients.delete(tenant, &auth, &name).await {
                    Ok(()) | Err(RegistryError::NotFound(_)) => {}
                    Err(e) => return Err(provisioning_error(e)),
                }
                self.clients
                    .create(tenant, &auth, &request)
                    .await
                    .map_err(provisioning_error)
            }
            Err(e) => Err(provisioning_error(e)),
        }
    }

    /// Refreshes a stale credential, falling back to a new grant with the
    /// same client when the refresh fails or yields a token that is already
    /// stale
    async fn renew(
        &self,
        tenant: &Tenant,
        subject: &str,
        mode: AuthMode<'_>,
        credential: Credential,
    ) -> Result<Credential, AuthError> {
        if let Some(refresh_token) = credential.refresh_token.clone() {
            let refreshed = self
                .grants
                .request_token(
                    &tenant.base_url,
                    &credential.client_key,
                    &credential.client_secret,
                    &Grant::Refresh { refresh_token },
                )
                .await;
            match refreshed {
                Ok(token) => {
                    let mut renewed = credential.clone();
                    renewed.apply_token(token);
                    if !renewed.is_stale() {
                        debug!("Refreshed credential for '{}'", subject);
                        return Ok(renewed);
                    }
                    warn!(
                        "Refresh for '{}' returned an expired token, requesting a new token",
                        subject
                    );
                }
                Err(e) => warn!(
                    "Refresh failed for '{}', requesting a new token: {}",
                    subject, e
                ),
            }
        }

        let token = self
            .grants
            .request_token(
                &tenant.base_url,
                &credential.client_key,
                &credential.client_secret,
                &mode.grant(subject),
            )
            .await
            .map_err(|e| {
                AuthError::token_request(format!("Unable to re-issue a token for '{subject}'"), e)
            })?;

        let mut reissued = credential;
        reissued.apply_token(token);
        Ok(reissued)
    }

    /// Revokes the cached credential of `subject` and deletes its client
    /// registration.
    ///
    /// Returns `true` when nothing is cached or at least one of the two actions
    /// succeeded. The cache entry is dropped after any attempt.
    pub async fn revoke_credential(
        &self,
        tenant: &Tenant,
        subject: &str,
        proof: Option<&PasswordProof>,
    ) -> Result<bool, AuthError> {
        Self::validate(tenant, subject)?;
        let key = self.cache_key(tenant, subject);

        let Some(credential) = self.cached(&key).await? else {
            debug!("No cached credential for '{}', nothing to revoke", key);
            return Ok(true);
        };
        let mode = self.mode(proof)?;

        let auth = mode.registry_auth();
        let name = self.client_name(tenant, subject);
        let (revoked, deleted) = tokio::join!(
            self.grants.revoke_token(
                &tenant.base_url,
                &credential.access_token,
                &credential.client_key,
                &credential.client_secret,
            ),
            self.clients.delete(tenant, &auth, &name),
        );

        if let Err(e) = &revoked {
            warn!(
                "Unable to revoke token {} for '{}': {}",
                token_fingerprint(&credential.access_token),
                subject,
                e
            );
        }
        if let Err(e) = &deleted {
            warn!("Unable to delete client registration '{}': {}", name, e);
        }

        self.cache.delete(&key).await?;
        Ok(revoked.is_ok() || deleted.is_ok())
    }
}
