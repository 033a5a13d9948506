//! Caller identity and access control over readings.

use entities::{Permission, User};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AuthError, AuthResult};

/// Which readings a query may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "user_id", rename_all = "snake_case")]
pub enum ReadingScope {
    /// Only readings owned by this user.
    Owner(Uuid),
    /// Every user's readings.
    All,
}

impl ReadingScope {
    /// Returns true if a reading owned by `owner` is visible in this scope.
    pub fn permits(&self, owner: Uuid) -> bool {
        match self {
            Self::Owner(id) => *id == owner,
            Self::All => true,
        }
    }
}

/// The authenticated user behind a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Caller {
    /// User ID
    pub user_id: Uuid,
    /// Email address
    pub email: String,
    /// Staff status
    pub is_staff: bool,
    /// Superusers hold every permission
    pub is_superuser: bool,
    /// Explicitly granted permissions
    pub permissions: Vec<Permission>,
}

impl Caller {
    /// Builds the caller identity for a user.
    pub fn from_user(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
            permissions: user.permissions.clone(),
        }
    }

    /// Checks if the caller holds a permission
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.is_superuser || self.permissions.contains(&permission)
    }

    /// Scope of the caller's own readings. Used by every owner endpoint,
    /// whatever permissions the caller holds.
    pub fn own_scope(&self) -> ReadingScope {
        ReadingScope::Owner(self.user_id)
    }

    /// Scope for the review listing; requires `view_all_readings`.
    pub fn review_scope(&self) -> AuthResult<ReadingScope> {
        if self.has_permission(Permission::ViewAllReadings) {
            Ok(ReadingScope::All)
        } else {
            Err(AuthError::PermissionDenied)
        }
    }

    /// Checks if the caller may read a reading owned by `owner`.
    pub fn can_read(&self, owner: Uuid) -> bool {
        self.user_id == owner || self.has_permission(Permission::ViewAllReadings)
    }
}
