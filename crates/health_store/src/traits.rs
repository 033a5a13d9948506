//! Health store trait definitions.

use async_trait::async_trait;
use auth::{AuthToken, ReadingScope};
use chrono::{DateTime, Utc};
use entities::{Permission, ProfileValues, Reading, User};
use uuid::Uuid;

use crate::StoreResult;

/// Filter options for listing readings.
#[derive(Debug, Clone)]
pub struct ReadingFilter {
    /// Which owners' readings are visible.
    pub scope: ReadingScope,
    /// Only readings created at or after this instant.
    pub created_since: Option<DateTime<Utc>>,
    /// Only readings that warrant an alert.
    pub abnormal_only: bool,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl ReadingFilter {
    /// Creates a filter matching every reading in `scope`.
    pub fn new(scope: ReadingScope) -> Self {
        Self {
            scope,
            created_since: None,
            abnormal_only: false,
            limit: None,
            offset: None,
        }
    }

    /// Restricts to readings created at or after `since`.
    pub fn created_since(mut self, since: DateTime<Utc>) -> Self {
        self.created_since = Some(since);
        self
    }

    /// Restricts to abnormal readings.
    pub fn abnormal_only(mut self) -> Self {
        self.abnormal_only = true;
        self
    }

    /// Sets pagination.
    pub fn page(mut self, limit: Option<u32>, offset: Option<u32>) -> Self {
        self.limit = limit;
        self.offset = offset;
        self
    }

    /// Returns true if `reading` passes every condition except pagination.
    pub fn matches(&self, reading: &Reading) -> bool {
        self.scope.permits(reading.user_id)
            && self
                .created_since
                .is_none_or(|since| reading.created_at >= since)
            && (!self.abnormal_only || reading.is_abnormal())
    }
}

/// Trait for health data storage operations.
///
/// Reading mutations take the owner's ID and match on `(id, owner)`: a
/// reading that belongs to someone else is reported as not found.
#[async_trait]
pub trait HealthStore: Send + Sync {
    // =========================================================================
    // User operations
    // =========================================================================

    /// Creates a new user. Fails if the email is taken in any case.
    async fn create_user(&self, user: User) -> StoreResult<User>;

    /// Gets a user by ID.
    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    /// Gets a user by email, case-insensitively.
    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;

    /// Replaces the profile fields of a user and stamps `updated_at`.
    ///
    /// Account status, permissions and the password hash are left as stored.
    /// Fails if the new email belongs to another user in any case.
    async fn update_profile(
        &self,
        id: Uuid,
        profile: ProfileValues,
        now: DateTime<Utc>,
    ) -> StoreResult<User>;

    /// Sets `last_login` and returns the stored user.
    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<User>;

    /// Grants a permission unless the user already holds it.
    async fn grant_permission(
        &self,
        id: Uuid,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> StoreResult<User>;

    /// Deletes a user together with their readings and token.
    async fn delete_user(&self, id: Uuid) -> StoreResult<()>;

    // =========================================================================
    // Token operations
    // =========================================================================

    /// Stores a token, replacing any previous token of the same user.
    async fn replace_token(&self, token: AuthToken) -> StoreResult<()>;

    /// Gets a token by the digest of its key.
    async fn get_token_by_digest(&self, digest: &str) -> StoreResult<Option<AuthToken>>;

    /// Deletes a user's token. Succeeds if there is none.
    async fn delete_token_for_user(&self, user_id: Uuid) -> StoreResult<()>;

    // =========================================================================
    // Reading operations
    // =========================================================================

    /// Creates a new reading after checking its invariants.
    async fn create_reading(&self, reading: Reading) -> StoreResult<Reading>;

    /// Gets a reading by ID if it is visible in `scope`.
    async fn get_reading(&self, scope: ReadingScope, id: Uuid) -> StoreResult<Option<Reading>>;

    /// Lists readings newest first, with the total count before pagination.
    async fn list_readings(&self, filter: ReadingFilter) -> StoreResult<(Vec<Reading>, u32)>;

    /// Updates a reading owned by `owner`. `created_at` is never changed.
    async fn update_reading(&self, owner: Uuid, reading: Reading) -> StoreResult<Reading>;

    /// Deletes a reading owned by `owner`.
    async fn delete_reading(&self, owner: Uuid, id: Uuid) -> StoreResult<()>;
}
