use crate::credentials::{Credential, PasswordProof};
use crate::errors::ApiError;
use crate::identity::{self, IdentityContext};
use crate::registry::Tenant;
use crate::state::AppState;
use axum::{body::Bytes, extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};

/// Optional body of credential requests; both fields select direct mode
#[derive(Debug, Default, Deserialize)]
struct CredentialRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CredentialResponse {
    tenant_id: String,
    subject: String,
    client_key: String,
    access_token: String,
    token_type: &'static str,
    /// Seconds left at the time of the response
    expires_in: i64,
    expires_at: DateTime<Utc>,
}

impl From<Credential> for CredentialResponse {
    fn from(credential: Credential) -> Self {
        Self {
            expires_in: credential.remaining_seconds(),
            tenant_id: credential.tenant_id,
            subject: credential.subject,
            client_key: credential.client_key,
            access_token: credential.access_token,
            token_type: "Bearer",
            expires_at: credential.expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct RevocationResponse {
    revoked: bool,
}

/// Reads the optional password proof; it must belong to the verified end user
fn password_proof(
    body: &Bytes,
    identity: &IdentityContext,
) -> Result<Option<PasswordProof>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let request: CredentialRequest = serde_json::from_slice(body)
        .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?;

    match (request.username, request.password) {
        (None, None) => Ok(None),
        (Some(username), Some(password)) => {
            if identity::normalize_end_user(&username, &identity.tenant_id) != identity.end_user {
                return Err(ApiError::bad_request(
                    "Username does not match the authenticated end user",
                ));
            }
            Ok(Some(PasswordProof::new(username, password)))
        }
        _ => Err(ApiError::bad_request(
            "Both username and password are required for direct credentials",
        )),
    }
}

async fn caller(state: &AppState) -> Result<(IdentityContext, Tenant), ApiError> {
    let identity = identity::current()
        .ok_or_else(|| ApiError::unauthorized("No verified identity for this request"))?;
    let tenant = state.resolve_tenant(&identity.raw_tenant_id).await?;
    Ok((identity, tenant))
}

async fn issue_credential_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<CredentialResponse>, ApiError> {
    let (identity, tenant) = caller(&state).await?;
    let proof = password_proof(&body, &identity)?;

    let credential = state
        .credentials
        .obtain_credential(&tenant, &identity.end_user, proof.as_ref())
        .await
        .map_err(|e| {
            error!("Failed to obtain credential for '{}': {}", identity.end_user, e);
            ApiError::from(e)
        })?;
    Ok(Json(credential.into()))
}

async fn revoke_credential_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RevocationResponse>, ApiError> {
    let (identity, tenant) = caller(&state).await?;
    let proof = password_proof(&body, &identity)?;

    let revoked = state
        .credentials
        .revoke_credential(&tenant, &identity.end_user, proof.as_ref())
        .await
        .map_err(|e| {
            error!("Failed to revoke credential for '{}': {}", identity.end_user, e);
            ApiError::from(e)
        })?;
    Ok(Json(RevocationResponse { revoked }))
}

pub(super) fn router() -> Router<AppState> {
    Router::new().route(
        "/v1/credentials",
        post(issue_credential_handler).delete(revoke_credential_handler),
    )
}
