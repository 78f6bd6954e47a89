use super::{Credential, CredentialManager, PasswordProof};
use crate::errors::AuthError;
use crate::registry::Tenant;
use tokio::runtime::{Builder, Runtime};

/// Synchronous front for [`CredentialManager`], for callers without a runtime.
///
/// Owns a current-thread runtime; must not be called from within an async
/// context.
pub struct BlockingCredentialManager {
    inner: CredentialManager,
    runtime: Runtime,
}

impl BlockingCredentialManager {
    pub fn new(inner: CredentialManager) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self { inner, runtime })
    }

    pub fn obtain_credential(
        &self,
        tenant: &Tenant,
        subject: &str,
        proof: Option<&PasswordProof>,
    ) -> Result<Credential, AuthError> {
        self.runtime
            .block_on(self.inner.obtain_credential(tenant, subject, proof))
    }

    pub fn revoke_credential(
        &self,
        tenant: &Tenant,
        subject: &str,
        proof: Option<&PasswordProof>,
    ) -> Result<bool, AuthError> {
        self.runtime
            .block_on(self.inner.revoke_credential(tenant, subject, proof))
    }
}
