//! Server error types.

use auth::AuthError;
use axum::{
    http::{header::RETRY_AFTER, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use entities::ValidationErrors;
use health_store::StoreError;
use serde_json::{json, Value};

/// Error codes carried in the response envelope.
pub mod error_codes {
    pub const VALIDATION_ERROR: &str = "validation_error";
    pub const INVALID_REQUEST: &str = "invalid_request";
    pub const AUTHENTICATION_FAILED: &str = "authentication_failed";
    pub const PERMISSION_DENIED: &str = "permission_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Field-scoped validation failures.
    #[error("{0}")]
    Validation(ValidationErrors),

    /// Malformed request (bad JSON, bad ID, bad query).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or rejected credentials.
    #[error("{0}")]
    AuthenticationFailed(String),

    /// Permission denied.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Too many requests from one client.
    #[error("Request was throttled. Expected available in {retry_after_secs} seconds.")]
    RateLimited { retry_after_secs: u64 },

    /// Store error.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Authentication error.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for ServerError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl ServerError {
    /// Shorthand for a validation error on one field.
    pub fn field(field: &str, message: impl Into<String>) -> Self {
        Self::Validation(ValidationErrors::single(field, message))
    }

    /// Resolves wrapped store and auth errors into the error the client sees.
    fn classify(self) -> Self {
        match self {
            ServerError::Store(StoreError::NotFound { entity_type, .. }) => {
                ServerError::NotFound(format!("{entity_type} not found."))
            }
            ServerError::Store(StoreError::AlreadyExists {
                entity_type: "User",
                ..
            }) => ServerError::field("email", "user with this email already exists."),
            ServerError::Store(StoreError::Invariant(errors)) => ServerError::Validation(errors),
            ServerError::Auth(
                e @ (AuthError::InvalidCredentials
                | AuthError::InactiveUser
                | AuthError::InvalidToken),
            ) => ServerError::AuthenticationFailed(e.to_string()),
            ServerError::Auth(e @ AuthError::PermissionDenied) => {
                ServerError::PermissionDenied(e.to_string())
            }
            other => other,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let error = self.classify();

        let (status, code, message, fields): (StatusCode, &str, String, Option<Value>) =
            match &error {
                ServerError::Validation(errors) => (
                    StatusCode::BAD_REQUEST,
                    error_codes::VALIDATION_ERROR,
                    "Invalid input.".to_string(),
                    serde_json::to_value(errors).ok(),
                ),
                ServerError::InvalidRequest(msg) => (
                    StatusCode::BAD_REQUEST,
                    error_codes::INVALID_REQUEST,
                    msg.clone(),
                    None,
                ),
                ServerError::AuthenticationFailed(msg) => (
                    StatusCode::UNAUTHORIZED,
                    error_codes::AUTHENTICATION_FAILED,
                    msg.clone(),
                    None,
                ),
                ServerError::PermissionDenied(msg) => (
                    StatusCode::FORBIDDEN,
                    error_codes::PERMISSION_DENIED,
                    msg.clone(),
                    None,
                ),
                ServerError::NotFound(msg) => (
                    StatusCode::NOT_FOUND,
                    error_codes::NOT_FOUND,
                    msg.clone(),
                    None,
                ),
                ServerError::RateLimited { .. } => (
                    StatusCode::TOO_MANY_REQUESTS,
                    error_codes::RATE_LIMITED,
                    error.to_string(),
                    None,
                ),
                ServerError::Store(_) | ServerError::Auth(_) | ServerError::Internal(_) => {
                    tracing::error!(error = %error, "Request failed with internal error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        error_codes::INTERNAL_ERROR,
                        "A server error occurred.".to_string(),
                        None,
                    )
                }
            };

        let mut body = json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        if let Some(fields) = fields {
            body["error"]["fields"] = fields;
        }

        let mut response = (status, Json(body)).into_response();
        if let ServerError::RateLimited { retry_after_secs } = error {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(retry_after_secs));
        }
        response
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
