use crate::cache::CacheError;
use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use serde_json::json;
use thiserror::Error;

/// Boxed underlying cause carried by [`AuthError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Provisioning,
    TokenRequest,
    TenantResolution,
    KeyFetch,
    KeyParse,
    InvalidInput,
    Cache,
}

/// Errors raised by credential management and tenant key resolution
#[derive(Debug, Error)]
pub enum AuthError {
    /// Client registry create/delete failed
    #[error("{message}")]
    Provisioning {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// The token endpoint rejected the grant or could not be reached
    #[error("{message}")]
    TokenRequest {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// Unknown tenant or unreachable tenant metadata
    #[error("{message}")]
    TenantResolution {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// Public key document missing or unreachable
    #[error("{message}")]
    KeyFetch {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    /// Public key document could not be parsed into an RSA key
    #[error("{message}")]
    KeyParse {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl AuthError {
    pub fn provisioning(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Provisioning {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn token_request(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::TokenRequest {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn tenant_resolution(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::TenantResolution {
            message: message.into(),
            source,
        }
    }

    pub fn key_fetch(message: impl Into<String>, source: Option<BoxError>) -> Self {
        Self::KeyFetch {
            message: message.into(),
            source,
        }
    }

    pub fn key_parse(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::KeyParse {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provisioning { .. } => ErrorKind::Provisioning,
            Self::TokenRequest { .. } => ErrorKind::TokenRequest,
            Self::TenantResolution { .. } => ErrorKind::TenantResolution,
            Self::KeyFetch { .. } => ErrorKind::KeyFetch,
            Self::KeyParse { .. } => ErrorKind::KeyParse,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Cache(_) => ErrorKind::Cache,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiError {
    pub detail: String,
    pub status_code: StatusCode,
}

impl ApiError {
    /// Create a new ApiError with a detail message and status code
    pub fn new<S: ToString>(detail: S, status_code: StatusCode) -> Self {
        Self {
            detail: detail.to_string(),
            status_code,
        }
    }

    /// Create new Internal Server Error (500) with a detail message
    pub fn internal<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Create new Bad Request Error (400) with a detail message
    pub fn bad_request<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_REQUEST)
    }

    /// Create new Unauthorized Error (401) with a detail message
    pub fn unauthorized<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::UNAUTHORIZED)
    }

    /// Create new Not Found Error (404) with a detail message
    pub fn not_found<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::NOT_FOUND)
    }

    /// Create new Bad Gateway (502) with a detail message
    pub fn bad_gateway<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_GATEWAY)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err.kind() {
            ErrorKind::InvalidInput => ApiError::bad_request(err),
            ErrorKind::TenantResolution => ApiError::not_found(err),
            ErrorKind::Provisioning
            | ErrorKind::TokenRequest
            | ErrorKind::KeyFetch
            | ErrorKind::KeyParse => ApiError::bad_gateway(err),
            ErrorKind::Cache => ApiError::internal(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        let body = json!({
            "detail": self.detail,
        });
        (status_code, Json(body)).into_response()
    }
}
