use crate::cache::CacheBackend;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use log::warn;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct Liveness {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct Readiness {
    status: &'static str,
    cache_store: &'static str,
    cache_status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health_check() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}

/// Ready once the credential cache answers
async fn ready_check(State(state): State<AppState>) -> (StatusCode, Json<Readiness>) {
    let cache_store = state.cache.store_name();
    match state.cache.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(Readiness {
                status: "ok",
                cache_store,
                cache_status: "healthy",
                error: None,
            }),
        ),
        Err(e) => {
            warn!("Credential cache is not ready: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(Readiness {
                    status: "error",
                    cache_store,
                    cache_status: "unhealthy",
                    error: Some(e),
                }),
            )
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
}
