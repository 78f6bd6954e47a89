//! Request-scoped identity derived from a verified JWT
//!
//! The context lives in a tokio task-local established by [`scope`]. It is
//! visible to everything awaited inside that scope and disappears with it, so
//! concurrently handled requests never observe each other's identity.

use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::future::Future;

pub const SUBSCRIBER_CLAIM: &str = "http://wso2.org/claims/subscriber";
pub const END_USER_CLAIM: &str = "http://wso2.org/claims/enduser";
pub const END_USER_TENANT_CLAIM: &str = "http://wso2.org/claims/enduserTenantId";
pub const ROLE_CLAIM: &str = "http://wso2.org/claims/role";
pub const APPLICATION_ID_CLAIM: &str = "http://wso2.org/claims/applicationid";

const DEFAULT_REALM_SUFFIX: &str = "@carbon.super";
const SERVICES_ADMIN_SUFFIX: &str = "-services-admin";
const SUPER_ADMIN_SUFFIX: &str = "-super-admin";
const JWT_HEADER_PREFIX: &str = "x-jwt-assertion-";

tokio::task_local! {
    static CURRENT: RefCell<Option<IdentityContext>>;
}

/// Normalized, verified claims of one inbound request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityContext {
    #[serde(skip)]
    pub jwt: String,
    #[serde(skip)]
    pub claims: Map<String, Value>,
    /// Tenant id exactly as supplied by the caller
    pub raw_tenant_id: String,
    pub tenant_id: String,
    pub end_user: String,
    pub subscriber: String,
    pub application_id: Option<String>,
    pub roles: Vec<String>,
    #[serde(skip)]
    pub bearer_token: Option<String>,
}

impl IdentityContext {
    /// Builds the context from a verified claim set.
    ///
    /// Returns the name of the first required value (end user, tenant,
    /// subscriber) that cannot be derived.
    pub fn from_claims(
        jwt: &str,
        claims: Map<String, Value>,
        raw_tenant_id: Option<&str>,
    ) -> Result<Self, &'static str> {
        let subscriber = string_claim(&claims, SUBSCRIBER_CLAIM).unwrap_or_default();
        let tenant_id = resolve_tenant(
            raw_tenant_id,
            Some(subscriber.as_str()),
            string_claim(&claims, END_USER_TENANT_CLAIM).as_deref(),
        )
        .unwrap_or_default();
        let end_user = string_claim(&claims, END_USER_CLAIM)
            .map(|raw| normalize_end_user(&raw, &tenant_id))
            .unwrap_or_default();

        if end_user.is_empty() {
            return Err("end user");
        }
        if tenant_id.is_empty() {
            return Err("tenant");
        }
        if subscriber.is_empty() {
            return Err("subscriber");
        }

        Ok(Self {
            jwt: jwt.to_string(),
            raw_tenant_id: raw_tenant_id.unwrap_or(&tenant_id).to_string(),
            tenant_id,
            end_user,
            subscriber,
            application_id: string_claim(&claims, APPLICATION_ID_CLAIM),
            roles: string_claim(&claims, ROLE_CLAIM)
                .map(|roles| parse_roles(&roles))
                .unwrap_or_default(),
            bearer_token: None,
            claims,
        })
    }

    /// True if any role is a services-admin or super-admin role of this tenant
    pub fn is_tenant_admin(&self) -> bool {
        self.roles
            .iter()
            .any(|role| is_admin_role(role, &self.raw_tenant_id))
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles
            .iter()
            .any(|role| is_super_admin_role(role, &self.raw_tenant_id))
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

fn string_claim(claims: &Map<String, Value>, name: &str) -> Option<String> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Lower-cases a tenant id and maps `_` and `-` to `.`
pub fn normalize_tenant(tenant_id: &str) -> String {
    tenant_id
        .trim()
        .to_lowercase()
        .replace(['_', '-'], ".")
}

/// Picks the tenant from the explicit id, else the subscriber's domain, else
/// the end-user-tenant claim, and normalizes it
pub fn resolve_tenant(
    explicit: Option<&str>,
    subscriber: Option<&str>,
    end_user_tenant: Option<&str>,
) -> Option<String> {
    let from_subscriber = subscriber
        .and_then(|s| s.rsplit_once('@'))
        .map(|(_, domain)| domain);

    [explicit, from_subscriber, end_user_tenant]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|tenant| !tenant.is_empty())
        .map(normalize_tenant)
}

/// Reduces a raw end-user claim to the bare user name within `tenant_id`
pub fn normalize_end_user(raw: &str, tenant_id: &str) -> String {
    let end_user = raw.replace(DEFAULT_REALM_SUFFIX, "");

    if !tenant_id.is_empty() && end_user.len() > tenant_id.len() && end_user.ends_with(tenant_id)
    {
        let mut rest = end_user[..end_user.len() - tenant_id.len()].chars();
        // separator
        rest.next_back();
        rest.as_str().to_string()
    } else if let Some((user, _)) = end_user.split_once('@') {
        user.to_string()
    } else if let Some((_, user)) = end_user.split_once('/') {
        user.to_string()
    } else {
        end_user
    }
}

pub fn parse_roles(roles: &str) -> Vec<String> {
    roles
        .split(',')
        .map(str::trim)
        .filter(|role| !role.is_empty())
        .map(str::to_string)
        .collect()
}

fn matches_admin_suffix(role: &str, raw_tenant_id: &str, suffixes: &[&str]) -> bool {
    if raw_tenant_id.is_empty() {
        return false;
    }
    let role = role.trim();
    let (path_prefix, name) = match role.rsplit_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, role),
    };

    suffixes.iter().any(|suffix| {
        name.strip_suffix(suffix)
            .is_some_and(|stem| stem == raw_tenant_id || path_prefix == Some(raw_tenant_id))
    })
}

/// `acme-corp/tenant-services-admin` and `Internal/acme-corp-super-admin` are
/// both admin roles of `acme-corp`
pub fn is_admin_role(role: &str, raw_tenant_id: &str) -> bool {
    matches_admin_suffix(
        role,
        raw_tenant_id,
        &[SERVICES_ADMIN_SUFFIX, SUPER_ADMIN_SUFFIX],
    )
}

pub fn is_super_admin_role(role: &str, raw_tenant_id: &str) -> bool {
    matches_admin_suffix(role, raw_tenant_id, &[SUPER_ADMIN_SUFFIX])
}

/// Spelling of a tenant id that survives in a header name: lower-case, `.`
/// replaced by `-`
pub fn header_safe_tenant_id(tenant_id: &str) -> String {
    tenant_id.replace('.', "-").to_lowercase()
}

/// Name of the header carrying a tenant's JWT assertion
pub fn jwt_header_for_tenant(tenant_id: &str) -> String {
    format!("{JWT_HEADER_PREFIX}{}", header_safe_tenant_id(tenant_id))
}

/// Raw tenant id named by a JWT assertion header.
///
/// The mapping in [`jwt_header_for_tenant`] is lossy, so the result is always
/// the header-safe spelling (`acme.corp` arrives as `acme-corp`). Tenant
/// registries must resolve that spelling.
pub fn tenant_from_jwt_header(header_name: &str) -> Option<&str> {
    header_name
        .strip_prefix(JWT_HEADER_PREFIX)
        .filter(|tenant| !tenant.is_empty())
}

/// Runs `future` with an empty identity slot
pub async fn scope<F: Future>(future: F) -> F::Output {
    CURRENT.scope(RefCell::new(None), future).await
}

/// Installs `context` for the enclosing scope; false outside of [`scope`]
pub fn install(context: IdentityContext) -> bool {
    CURRENT
        .try_with(|current| *current.borrow_mut() = Some(context))
        .is_ok()
}

/// A copy of the identity of the current request, if one was installed
pub fn current() -> Option<IdentityContext> {
    CURRENT
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()
}

pub fn with_current<R>(f: impl FnOnce(&IdentityContext) -> R) -> Option<R> {
    CURRENT
        .try_with(|current| current.borrow().as_ref().map(f))
        .ok()
        .flatten()
}

fn update(f: impl FnOnce(&mut IdentityContext)) -> bool {
    CURRENT
        .try_with(|current| current.borrow_mut().as_mut().map(f).is_some())
        .unwrap_or(false)
}

/// Overrides the tenant; the subscriber follows it
pub fn set_tenant(tenant_id: &str) -> bool {
    update(|context| {
        context.tenant_id = tenant_id.to_string();
        context.subscriber = tenant_id.to_string();
    })
}

pub fn set_end_user(end_user: &str) -> bool {
    update(|context| context.end_user = end_user.to_string())
}

pub fn set_bearer_token(bearer_token: &str) -> bool {
    update(|context| context.bearer_token = Some(bearer_token.to_string()))
}

pub fn clear() {
    let _ = CURRENT.try_with(|current| current.borrow_mut().take());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn claims(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("claims must be an object"),
        }
    }

    #[test]
    fn test_normalize_tenant() {
        assert_eq!(normalize_tenant("Acme-Corp"), "acme.corp");
        assert_eq!(normalize_tenant("iplant_collaborative"), "iplant.collaborative");
    }

    #[test]
    fn test_resolve_tenant_fallbacks() {
        assert_eq!(
            resolve_tenant(Some("acme-corp"), Some("bob@other.org"), None).as_deref(),
            Some("acme.corp")
        );
        assert_eq!(
            resolve_tenant(None, Some("bob@other_org"), Some("third")).as_deref(),
            Some("other.org")
        );
        assert_eq!(
            resolve_tenant(None, Some("bob"), Some("Third-Tenant")).as_deref(),
            Some("third.tenant")
        );
        assert_eq!(resolve_tenant(None, None, None), None);
    }

    #[test]
    fn test_normalize_end_user() {
        assert_eq!(normalize_end_user("alice@acme.corp", "acme.corp"), "alice");
        assert_eq!(normalize_end_user("alice@carbon.super", "acme.corp"), "alice");
        assert_eq!(normalize_end_user("alice@other.org", "acme.corp"), "alice");
        assert_eq!(normalize_end_user("PRIMARY/alice", "acme.corp"), "alice");
        assert_eq!(normalize_end_user("alice", "acme.corp"), "alice");
    }

    #[test]
    fn test_admin_roles() {
        assert!(is_admin_role("acme-corp/tenant-services-admin", "acme-corp"));
        assert!(!is_admin_role("acme-corp/tenant-services-admin", "other-corp"));
        assert!(is_admin_role("Internal/acme-corp-services-admin", "acme-corp"));
        assert!(is_admin_role("acme-corp-super-admin", "acme-corp"));
        assert!(!is_admin_role("acme-corp-user", "acme-corp"));
        assert!(!is_admin_role("acme-corp-services-admin", ""));

        assert!(is_super_admin_role("Internal/acme-corp-super-admin", "acme-corp"));
        assert!(!is_super_admin_role("acme-corp/tenant-services-admin", "acme-corp"));
    }

    #[test]
    fn test_context_from_claims() {
        let context = IdentityContext::from_claims(
            "a.b.c",
            claims(json!({
                SUBSCRIBER_CLAIM: "alice@acme.corp",
                END_USER_CLAIM: "alice@acme.corp",
                ROLE_CLAIM: "Internal/everyone, acme-corp/tenant-services-admin",
                APPLICATION_ID_CLAIM: "42"
            })),
            Some("acme-corp"),
        )
        .expect("context rejected");

        assert_eq!(context.raw_tenant_id, "acme-corp");
        assert_eq!(context.tenant_id, "acme.corp");
        assert_eq!(context.end_user, "alice");
        assert_eq!(context.application_id.as_deref(), Some("42"));
        assert_eq!(context.roles.len(), 2);
        assert!(context.is_tenant_admin());
        assert!(!context.is_super_admin());
    }

    #[test]
    fn test_context_requires_claims() {
        let missing_subscriber = IdentityContext::from_claims(
            "a.b.c",
            claims(json!({ END_USER_CLAIM: "alice" })),
            Some("acme-corp"),
        );
        assert_eq!(missing_subscriber, Err("subscriber"));

        let missing_end_user = IdentityContext::from_claims(
            "a.b.c",
            claims(json!({ SUBSCRIBER_CLAIM: "alice@acme.corp" })),
            Some("acme-corp"),
        );
        assert_eq!(missing_end_user, Err("end user"));
    }

    #[test]
    fn test_jwt_header_for_tenant() {
        assert_eq!(jwt_header_for_tenant("Acme.Corp"), "x-jwt-assertion-acme-corp");
        assert_eq!(header_safe_tenant_id("Acme.Corp"), "acme-corp");
        assert_eq!(
            tenant_from_jwt_header("x-jwt-assertion-acme-corp"),
            Some("acme-corp")
        );
        assert_eq!(tenant_from_jwt_header("x-jwt-assertion-"), None);
        assert_eq!(tenant_from_jwt_header("authorization"), None);
    }

    fn sample_context() -> IdentityContext {
        IdentityContext::from_claims(
            "a.b.c",
            claims(json!({
                SUBSCRIBER_CLAIM: "alice@acme.corp",
                END_USER_CLAIM: "alice@acme.corp"
            })),
            Some("acme-corp"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_scope_isolates_requests() {
        assert!(current().is_none());
        assert!(!install(sample_context()));

        let first = tokio::spawn(scope(async {
            assert!(install(sample_context()));
            tokio::task::yield_now().await;
            assert!(set_end_user("bob"));
            assert!(set_bearer_token("bearer-1"));
            current()
        }));
        let second = tokio::spawn(scope(async {
            tokio::task::yield_now().await;
            current()
        }));

        let first = first.await.unwrap().expect("identity missing in first scope");
        assert_eq!(first.end_user, "bob");
        assert_eq!(first.bearer_token.as_deref(), Some("bearer-1"));
        assert!(second.await.unwrap().is_none());
        assert!(current().is_none());
    }

    #[tokio::test]
    async fn test_set_tenant_updates_subscriber() {
        scope(async {
            assert!(!set_tenant("other.org"));
            install(sample_context());
            assert!(set_tenant("other.org"));
            let context = current().unwrap();
            assert_eq!(context.tenant_id, "other.org");
            assert_eq!(context.subscriber, "other.org");
            assert_eq!(with_current(|c| c.end_user.clone()).as_deref(), Some("alice"));

            clear();
            assert!(current().is_none());
        })
        .await;
    }
}
