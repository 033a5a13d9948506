//! Authentication error types.

use thiserror::Error;

/// Errors that can occur during authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Password hashing failed.
    #[error("Password hashing failed: {0}")]
    Hashing(String),

    /// Stored password hash could not be parsed.
    #[error("Malformed password hash: {0}")]
    MalformedHash(String),

    /// Email or password did not match.
    #[error("Unable to log in with provided credentials")]
    InvalidCredentials,

    /// Account is deactivated.
    #[error("User account is disabled")]
    InactiveUser,

    /// Missing or unknown token.
    #[error("Invalid token")]
    InvalidToken,

    /// Caller lacks the permission for the action.
    #[error("You do not have permission to perform this action.")]
    PermissionDenied,
}

/// Result type for authentication operations.
pub type AuthResult<T> = Result<T, AuthError>;
