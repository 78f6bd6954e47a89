use crate::errors::ApiError;
use crate::identity::{self, IdentityContext};
use crate::state::AppState;
use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;

/// The verified identity of the caller
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdentityResponse {
    #[serde(flatten)]
    identity: IdentityContext,
    tenant_admin: bool,
    super_admin: bool,
    has_bearer_token: bool,
}

async fn identity_handler() -> Response {
    match identity::current() {
        Some(identity) => Json(IdentityResponse {
            tenant_admin: identity.is_tenant_admin(),
            super_admin: identity.is_super_admin(),
            has_bearer_token: identity.bearer_token.is_some(),
            identity,
        })
        .into_response(),
        None => ApiError::unauthorized("No verified identity for this request").into_response(),
    }
}

pub(super) fn router() -> Router<AppState> {
    Router::new().route("/v1/identity", get(identity_handler))
}
