use crate::transport::{AccessToken, OAuthRequest, OAuthTransport, TransportError, Verb};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::debug;
use std::fmt;
use std::sync::Arc;

pub const TOKEN_PATH: &str = "/token";
pub const AUTHORIZE_PATH: &str = "/authorize";
pub const REVOKE_PATH: &str = "/revoke";

/// The grants the broker knows how to request
#[derive(Clone, PartialEq)]
pub enum Grant {
    /// Resource owner password grant
    Password { username: String, password: String },
    /// Administrative impersonation: the service identity authenticates and
    /// the token is issued for `token_username`
    Impersonation {
        service_username: String,
        service_password: String,
        token_username: String,
    },
    Refresh { refresh_token: String },
}

impl Grant {
    pub fn grant_type(&self) -> &'static str {
        match self {
            Self::Password { .. } => "password",
            Self::Impersonation { .. } => "admin_password",
            Self::Refresh { .. } => "refresh_token",
        }
    }

    fn apply(&self, request: OAuthRequest) -> OAuthRequest {
        match self {
            Self::Password { username, password } => request
                .param("username", username.as_str())
                .param("password", password.as_str()),
            Self::Impersonation {
                service_username,
                service_password,
                token_username,
            } => request
                .param("username", service_username.as_str())
                .param("password", service_password.as_str())
                .param("token_username", token_username.as_str()),
            Self::Refresh { refresh_token } => {
                request.param("refresh_token", refresh_token.as_str())
            }
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::Impersonation {
                service_username,
                token_username,
                ..
            } => f
                .debug_struct("Impersonation")
                .field("service_username", service_username)
                .field("token_username", token_username)
                .finish_non_exhaustive(),
            Self::Refresh { .. } => f.debug_struct("Refresh").finish_non_exhaustive(),
        }
    }
}

/// Issues, refreshes and revokes tokens against a tenant's OAuth2 endpoints
#[derive(Clone)]
pub struct GrantService {
    transport: Arc<dyn OAuthTransport>,
    scope: Option<String>,
}

impl GrantService {
    pub fn new(transport: Arc<dyn OAuthTransport>, scope: Option<String>) -> Self {
        Self { transport, scope }
    }

    /// Requests a token from `{base_url}/token`.
    ///
    /// Transport and endpoint errors are returned as they are, nothing is
    /// retried here.
    pub async fn request_token(
        &self,
        base_url: &str,
        client_key: &str,
        client_secret: &str,
        grant: &Grant,
    ) -> Result<AccessToken, TransportError> {
        let mut request = OAuthRequest::new(Verb::Post, endpoint(base_url, TOKEN_PATH));
        request = grant.apply(request);
        if let Some(scope) = &self.scope {
            request = request.param("scope", scope.as_str());
        }
        request = request.param("grant_type", grant.grant_type());
        if let Some(authorization) = basic_authorization(client_key, client_secret) {
            request = request.header("authorization", authorization);
        }

        debug!("Requesting '{}' token from {}", grant.grant_type(), request.url);
        self.transport.send(request).await?.error_for_status()?.json()
    }

    /// Revokes `access_token`, returning the endpoint's response body untouched
    pub async fn revoke_token(
        &self,
        base_url: &str,
        access_token: &str,
        client_key: &str,
        client_secret: &str,
    ) -> Result<String, TransportError> {
        let mut request = OAuthRequest::new(Verb::Post, endpoint(base_url, REVOKE_PATH))
            .param("token", access_token);
        if let Some(authorization) = basic_authorization(client_key, client_secret) {
            request = request.header("authorization", authorization);
        }

        let response = self.transport.send(request).await?.error_for_status()?;
        Ok(response.body)
    }

    /// Builds the authorization code URL for `{base_url}/authorize`
    pub fn authorization_url(
        &self,
        base_url: &str,
        client_key: &str,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(&endpoint(base_url, AUTHORIZE_PATH))?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", client_key)
                .append_pair("redirect_uri", redirect_uri);
            if let Some(scope) = &self.scope {
                query.append_pair("scope", scope);
            }
            query.append_pair("state", state);
        }
        Ok(url.to_string())
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// `Basic base64(key:secret)`, only when both halves are present
pub(crate) fn basic_authorization(key: &str, secret: &str) -> Option<String> {
    if key.is_empty() || secret.is_empty() {
        return None;
    }
    Some(format!("Basic {}", STANDARD.encode(format!("{key}:{secret}"))))
}
