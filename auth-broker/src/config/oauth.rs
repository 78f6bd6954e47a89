//! OAuth and outbound HTTP configuration

use serde::Deserialize;

/// Settings shared by every grant the broker performs
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OAuthConfig {
    /// Scope sent with token requests, omitted when unset
    #[serde(default)]
    pub scope: Option<String>,

    /// Service account used for impersonation grants and for managing
    /// impersonation client registrations
    #[serde(default)]
    pub service_username: String,

    #[serde(default)]
    pub service_password: String,
}

impl OAuthConfig {
    /// Returns the service account when both halves are configured
    pub fn service_account(&self) -> Option<(String, String)> {
        if self.service_username.is_empty() || self.service_password.is_empty() {
            None
        } else {
            Some((self.service_username.clone(), self.service_password.clone()))
        }
    }
}

/// Timeouts for every outbound call (token endpoint, registries, public keys)
#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout in seconds (default: 10)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Connect timeout in seconds (default: 2)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

fn default_request_timeout() -> u64 {
    10
}

fn default_connect_timeout() -> u64 {
    2
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}
