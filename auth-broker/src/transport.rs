//! Outbound OAuth2 HTTP plumbing
//!
//! Every token, revocation and registry call leaves the broker through an
//! [`OAuthTransport`], which keeps the grant logic testable against mocks.

use async_trait::async_trait;
use log::debug;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

/// HTTP verb of an [`OAuthRequest`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Get,
    Post,
    Delete,
}

/// A request to an OAuth2 endpoint.
///
/// `params` are sent form-encoded for `Post` and as the query string otherwise.
#[derive(Debug, Clone)]
pub struct OAuthRequest {
    pub verb: Verb,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl OAuthRequest {
    pub fn new(verb: Verb, url: impl Into<String>) -> Self {
        Self {
            verb,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the value of the first parameter called `name`
    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Raw response of an OAuth2 endpoint
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fails with [`TransportError::InvalidStatus`] on a non-2xx status
    pub fn error_for_status(self) -> Result<Self, TransportError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(TransportError::InvalidStatus {
                status: self.status,
                body: self.body,
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Errors that can occur while talking to an OAuth2 endpoint
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to send request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Request failed with status {status}: {body}")]
    InvalidStatus { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[async_trait]
pub trait OAuthTransport: Send + Sync {
    /// Sends the request; any HTTP status is returned as a response
    async fn send(&self, request: OAuthRequest) -> Result<TransportResponse, TransportError>;
}

/// [`OAuthTransport`] backed by a shared reqwest client
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OAuthTransport for HttpTransport {
    async fn send(&self, request: OAuthRequest) -> Result<TransportResponse, TransportError> {
        debug!("Sending {:?} request to {}", request.verb, request.url);

        let mut builder = match request.verb {
            Verb::Get => self.client.get(&request.url).query(&request.params),
            Verb::Delete => self.client.delete(&request.url).query(&request.params),
            Verb::Post => self.client.post(&request.url).form(&request.params),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(TransportResponse { status, body })
    }
}

/// Token endpoint response
#[derive(Clone, Deserialize, PartialEq)]
pub struct AccessToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_in", &self.expires_in)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .finish()
    }
}
