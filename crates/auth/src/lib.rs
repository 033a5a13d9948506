//! Authentication and authorization for Pulselog.
//!
//! This crate provides:
//! - Argon2 password hashing and a pluggable password-strength policy
//! - Opaque bearer-token generation and digesting
//! - Caller identity and the access-control decisions over readings

mod access;
mod error;
mod password;
mod policy;
mod token;

pub use access::*;
pub use error::*;
pub use password::*;
pub use policy::*;
pub use token::*;

/// Length in bytes of generated bearer tokens.
pub const TOKEN_BYTES: usize = 32;

/// Minimum password length enforced by the default policy.
pub const DEFAULT_MIN_PASSWORD_LENGTH: usize = 8;
