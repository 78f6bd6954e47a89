use super::{RegistryError, Tenant, TenantRegistry};
use crate::identity::header_safe_tenant_id;
use async_trait::async_trait;
use std::collections::HashMap;

/// Tenant registry backed by a fixed table, used when the broker serves a
/// known set of tenants.
///
/// Tenants are matched on their header-safe spelling, so `acme.corp` resolves
/// from the `acme-corp` id carried by its assertion header.
#[derive(Debug, Clone, Default)]
pub struct StaticTenantRegistry {
    tenants: HashMap<String, Tenant>,
}

impl StaticTenantRegistry {
    pub fn new(table: impl IntoIterator<Item = (String, String)>) -> Self {
        let tenants = table
            .into_iter()
            .map(|(code, base_url)| (header_safe_tenant_id(&code), Tenant { code, base_url }))
            .collect();
        Self { tenants }
    }
}

#[async_trait]
impl TenantRegistry for StaticTenantRegistry {
    async fn resolve(&self, tenant_id: &str) -> Result<Tenant, RegistryError> {
        self.tenants
            .get(&header_safe_tenant_id(tenant_id))
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(tenant_id.to_string()))
    }
}
