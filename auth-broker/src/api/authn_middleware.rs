use crate::errors::ApiError;
use crate::identity;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::HeaderMap;
use log::warn;

/// Finds the `x-jwt-assertion-<tenant>` header, returning the raw tenant id
/// and the assertion
fn find_assertion(headers: &HeaderMap) -> Option<(String, String)> {
    headers.iter().find_map(|(name, value)| {
        let tenant_id = identity::tenant_from_jwt_header(name.as_str())?;
        let jwt = value.to_str().ok()?.trim();
        (!jwt.is_empty()).then(|| (tenant_id.to_string(), jwt.to_string()))
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => {
            Some(token.trim().to_string())
        }
        _ => None,
    }
}

/// Verifies the tenant's JWT assertion and runs the rest of the request inside
/// an identity scope holding the verified identity
pub(super) async fn authentication_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some((tenant_id, jwt)) = find_assertion(request.headers()) else {
        warn!("Missing JWT assertion header");
        return ApiError::unauthorized("Missing JWT assertion header").into_response();
    };
    let bearer = bearer_token(request.headers());

    identity::scope(async move {
        if !state.verifier.verify(&jwt, &tenant_id).await {
            return ApiError::unauthorized(
                "You are not authorized to access this resource, please check your JWT assertion.",
            )
            .into_response();
        }
        if let Some(bearer) = bearer {
            identity::set_bearer_token(&bearer);
        }
        next.run(request).await
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{identity_claims, sign_jwt, TestFixture};
    use http::StatusCode;
    use serde_json::json;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(http::header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(http::header::AUTHORIZATION, "Basic abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn test_missing_assertion_header() {
        let fixture = TestFixture::new().await;
        let response = fixture.get("/v1/identity", &[]).await;

        response.assert_status(StatusCode::UNAUTHORIZED);
        assert_eq!(response.json, json!({"detail": "Missing JWT assertion header"}));
    }

    #[tokio::test]
    async fn test_expired_assertion_rejected() {
        let fixture = TestFixture::new().await;
        fixture.mount_public_key(1).await;
        let jwt = sign_jwt(&identity_claims("alice@acme.corp", "alice@acme.corp", -60));

        let response = fixture
            .get("/v1/identity", &[("x-jwt-assertion-acme-corp", jwt.as_str())])
            .await;
        response.assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_bearer_token_recorded_in_identity() {
        let fixture = TestFixture::new().await;
        fixture.mount_public_key(1).await;
        let jwt = sign_jwt(&identity_claims("alice@acme.corp", "alice@acme.corp", 60));

        let response = fixture
            .get(
                "/v1/identity",
                &[
                    ("x-jwt-assertion-acme-corp", jwt.as_str()),
                    ("authorization", "Bearer opaque-token"),
                ],
            )
            .await;
        response.assert_ok();
        assert_eq!(response.json["hasBearerToken"], json!(true));
    }
}
