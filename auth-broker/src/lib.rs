//! Multi-tenant OAuth2 credential broker.
//!
//! Issues and caches one credential per tenant and subject, renews stale
//! credentials, and verifies tenant-signed JWT assertions into a
//! request-scoped [`identity::IdentityContext`].

mod api;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod grant;
pub mod identity;
pub mod jwt;
pub mod keys;
pub mod registry;
pub mod state;
pub mod transport;
#[cfg(test)]
mod test_utils;

use crate::state::AppState;
use axum::Router;

/// Create a new application instance with a given state
pub fn create_app(state: AppState) -> Router {
    Router::new().merge(api::router(&state)).with_state(state)
}
