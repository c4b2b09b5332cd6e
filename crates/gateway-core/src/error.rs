//! Error types for the gateway core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Result type alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the gateway pipeline.
///
/// Each variant carries an HTTP status via [`Error::status_code`], matching
/// the taxonomy in the error-handling design: configuration errors are
/// always 500, authentication/authorization/validation/conflict/upstream
/// errors carry the status named alongside them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Routing error: {message}")]
    Routing { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Authentication error: {message}")]
    Authentication { message: String },

    #[error("Authorization error: {message}")]
    Authorization { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Proxy error: {message}")]
    Proxy { message: String },

    #[error("Upstream error: {message} (status {status})")]
    Upstream { message: String, status: u16 },

    #[error("Database error: {message}")]
    Database { message: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Generic error: {0}")]
    Generic(String),
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Self::Generic(message)
    }
}

impl Error {
    /// Create a configuration error (always surfaces as 500).
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    /// Create a routing error (surfaces as 500; missing routes use 404 directly).
    pub fn routing<S: Into<String>>(message: S) -> Self {
        Self::Routing { message: message.into() }
    }

    /// Create a validation error (400).
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into() }
    }

    /// Create an authentication error (401).
    pub fn authentication<S: Into<String>>(message: S) -> Self {
        Self::Authentication { message: message.into() }
    }

    /// Create an authorization error (403).
    pub fn authorization<S: Into<String>>(message: S) -> Self {
        Self::Authorization { message: message.into() }
    }

    /// Create a conflict error (409).
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict { message: message.into() }
    }

    /// Create a proxy error (502).
    pub fn proxy<S: Into<String>>(message: S) -> Self {
        Self::Proxy { message: message.into() }
    }

    /// Create an upstream error carrying its own surfaced status code.
    pub fn upstream<S: Into<String>>(message: S, status: u16) -> Self {
        Self::Upstream { message: message.into(), status }
    }

    /// Create a database error. `status` is 500 unless the driver raised a
    /// conventional `50XXX` code, in which case the `XXX` portion is used.
    pub fn database<S: Into<String>>(message: S, status: u16) -> Self {
        Self::Database { message: message.into(), status }
    }

    /// Create a generic error.
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic(message.into())
    }

    /// The HTTP status this error surfaces as.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Routing { .. } => StatusCode::NOT_FOUND,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Authentication { .. } => StatusCode::UNAUTHORIZED,
            Self::Authorization { .. } => StatusCode::FORBIDDEN,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::Proxy { .. } => StatusCode::BAD_GATEWAY,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Database { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Io(_)
            | Self::Json(_)
            | Self::Yaml(_)
            | Self::Http(_)
            | Self::UrlParse(_)
            | Self::Regex(_)
            | Self::Generic(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    /// Converts the error into a terse JSON body, matching the taxonomy's
    /// requirement that unexpected conditions expose a generic message while
    /// the specific, user-facing kinds (auth, validation, conflict) keep
    /// their own terse message.
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Authentication { message } | Self::Authorization { message } => message.clone(),
            Self::Validation { message } | Self::Conflict { message } => message.clone(),
            _ => {
                tracing::error!(error = %self, "request failed");
                "An unexpected error occurred".to_string()
            }
        };
        (status, axum::Json(json!({ "success": false, "message": message }))).into_response()
    }
}
