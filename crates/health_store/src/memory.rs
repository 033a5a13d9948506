//! In-memory health store implementation.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use auth::{AuthToken, ReadingScope};
use chrono::{DateTime, Utc};
use entities::{normalize_email, Permission, ProfileValues, Reading, User};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{HealthStore, ReadingFilter, StoreError, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    /// Keyed by token digest.
    tokens: HashMap<String, AuthToken>,
    readings: HashMap<Uuid, Reading>,
}

impl Tables {
    fn email_taken(&self, email: &str, except: Option<Uuid>) -> bool {
        let email = normalize_email(email);
        self.users
            .values()
            .any(|u| Some(u.id) != except && u.email == email)
    }
}

/// In-memory health store for tests and ephemeral servers.
///
/// All tables share one lock so cascades and token replacement are atomic.
#[derive(Debug, Default, Clone)]
pub struct MemoryHealthStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryHealthStore {
    /// Creates a new in-memory health store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HealthStore for MemoryHealthStore {
    // =========================================================================
    // User operations
    // =========================================================================

    async fn create_user(&self, mut user: User) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        user.email = normalize_email(&user.email);

        if tables.users.contains_key(&user.id) {
            return Err(StoreError::already_exists("User", user.id.to_string()));
        }
        if tables.email_taken(&user.email, None) {
            return Err(StoreError::already_exists("User", user.email));
        }

        tables.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.get(&id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let tables = self.tables.read().await;
        let email = normalize_email(email);
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn update_profile(
        &self,
        id: Uuid,
        profile: ProfileValues,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.write().await;

        if tables.email_taken(&profile.email, Some(id)) {
            return Err(StoreError::already_exists("User", normalize_email(&profile.email)));
        }

        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("User", id.to_string()))?;
        user.apply_profile(profile, now);
        Ok(user.clone())
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("User", id.to_string()))?;
        user.last_login = Some(at);
        Ok(user.clone())
    }

    async fn grant_permission(
        &self,
        id: Uuid,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let mut tables = self.tables.write().await;
        let user = tables
            .users
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("User", id.to_string()))?;
        if !user.permissions.contains(&permission) {
            user.permissions.push(permission);
            user.updated_at = now;
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.users.remove(&id).is_none() {
            return Err(StoreError::not_found("User", id.to_string()));
        }
        tables.tokens.retain(|_, t| t.user_id != id);
        tables.readings.retain(|_, r| r.user_id != id);
        Ok(())
    }

    // =========================================================================
    // Token operations
    // =========================================================================

    async fn replace_token(&self, token: AuthToken) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&token.user_id) {
            return Err(StoreError::not_found("User", token.user_id.to_string()));
        }
        tables.tokens.retain(|_, t| t.user_id != token.user_id);
        tables.tokens.insert(token.digest.clone(), token);
        Ok(())
    }

    async fn get_token_by_digest(&self, digest: &str) -> StoreResult<Option<AuthToken>> {
        let tables = self.tables.read().await;
        Ok(tables.tokens.get(digest).cloned())
    }

    async fn delete_token_for_user(&self, user_id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        tables.tokens.retain(|_, t| t.user_id != user_id);
        Ok(())
    }

    // =========================================================================
    // Reading operations
    // =========================================================================

    async fn create_reading(&self, reading: Reading) -> StoreResult<Reading> {
        reading.check_invariants()?;

        let mut tables = self.tables.write().await;
        if !tables.users.contains_key(&reading.user_id) {
            return Err(StoreError::not_found("User", reading.user_id.to_string()));
        }
        if tables.readings.contains_key(&reading.id) {
            return Err(StoreError::already_exists("Reading", reading.id.to_string()));
        }

        tables.readings.insert(reading.id, reading.clone());
        Ok(reading)
    }

    async fn get_reading(&self, scope: ReadingScope, id: Uuid) -> StoreResult<Option<Reading>> {
        let tables = self.tables.read().await;
        Ok(tables
            .readings
            .get(&id)
            .filter(|r| scope.permits(r.user_id))
            .cloned())
    }

    async fn list_readings(&self, filter: ReadingFilter) -> StoreResult<(Vec<Reading>, u32)> {
        let tables = self.tables.read().await;
        let mut result: Vec<Reading> = tables
            .readings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();

        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = result.len() as u32;

        if let Some(offset) = filter.offset {
            result = result.into_iter().skip(offset as usize).collect();
        }
        if let Some(limit) = filter.limit {
            result = result.into_iter().take(limit as usize).collect();
        }

        Ok((result, total))
    }

    async fn update_reading(&self, owner: Uuid, mut reading: Reading) -> StoreResult<Reading> {
        reading.check_invariants()?;

        let mut tables = self.tables.write().await;
        let existing = tables
            .readings
            .get_mut(&reading.id)
            .filter(|r| r.user_id == owner)
            .ok_or_else(|| StoreError::not_found("Reading", reading.id.to_string()))?;

        reading.user_id = owner;
        reading.created_at = existing.created_at;
        *existing = reading.clone();
        Ok(reading)
    }

    async fn delete_reading(&self, owner: Uuid, id: Uuid) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let owned = tables
            .readings
            .get(&id)
            .is_some_and(|r| r.user_id == owner);
        if !owned {
            return Err(StoreError::not_found("Reading", id.to_string()));
        }
        tables.readings.remove(&id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use entities::{GlucoseUnit, ReadingValues};

    use super::*;

    fn values(systolic: i32, diastolic: i32, glucose_level: f64) -> ReadingValues {
        ReadingValues {
            systolic,
            diastolic,
            glucose_level,
            glucose_unit: GlucoseUnit::MgDl,
            notes: String::new(),
        }
    }

    async fn store_with_user(email: &str) -> (MemoryHealthStore, User) {
        let store = MemoryHealthStore::new();
        let user = store.create_user(User::new(email, "hash", Utc::now())).await.unwrap();
        (store, user)
    }

    #[tokio::test]
    async fn test_user_crud() {
        let (store, user) = store_with_user("Jane@Example.com").await;

        let fetched = store.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(fetched.email, "jane@example.com");

        let by_email = store.get_user_by_email(" JANE@example.COM").await.unwrap();
        assert_eq!(by_email.map(|u| u.id), Some(user.id));

        let mut profile = fetched.profile();
        profile.first_name = "Jane".to_string();
        let later = fetched.updated_at + Duration::minutes(5);
        let updated = store.update_profile(user.id, profile, later).await.unwrap();
        assert_eq!(updated.first_name, "Jane");
        assert_eq!(updated.updated_at, later);
        assert_eq!(
            store.get_user(user.id).await.unwrap().unwrap().first_name,
            "Jane"
        );

        store.delete_user(user.id).await.unwrap();
        assert!(store.get_user(user.id).await.unwrap().is_none());
        assert!(store.delete_user(user.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_email_any_case() {
        let (store, _) = store_with_user("dup@example.com").await;

        let result = store.create_user(User::new("DUP@example.com", "hash", Utc::now())).await;
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));

        let other = store
            .create_user(User::new("other@example.com", "hash", Utc::now()))
            .await
            .unwrap();
        let mut renamed = other.profile();
        renamed.email = "Dup@Example.com".to_string();
        assert!(matches!(
            store.update_profile(other.id, renamed, Utc::now()).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        // Changing only the case of one's own email is allowed.
        let mut own = other.profile();
        own.email = "OTHER@example.com".to_string();
        let updated = store.update_profile(other.id, own, Utc::now()).await.unwrap();
        assert_eq!(updated.email, "other@example.com");
    }

    #[tokio::test]
    async fn test_targeted_user_updates_keep_other_fields() {
        let (store, user) = store_with_user("keep@example.com").await;
        let now = Utc::now();

        let granted = store
            .grant_permission(user.id, Permission::ViewAllReadings, now)
            .await
            .unwrap();
        assert_eq!(granted.permissions, vec![Permission::ViewAllReadings]);

        // Granting twice keeps a single entry.
        store
            .grant_permission(user.id, Permission::ViewAllReadings, now)
            .await
            .unwrap();

        let mut profile = user.profile();
        profile.age = Some(42);
        store.update_profile(user.id, profile, now).await.unwrap();

        let logged_in = store.record_login(user.id, now).await.unwrap();
        assert_eq!(logged_in.last_login, Some(now));
        assert_eq!(logged_in.age, Some(42));
        assert_eq!(logged_in.permissions, vec![Permission::ViewAllReadings]);
        assert_eq!(logged_in.password_hash, "hash");

        let missing = Uuid::new_v4();
        assert!(store.record_login(missing, now).await.unwrap_err().is_not_found());
        assert!(store
            .grant_permission(missing, Permission::ViewAllReadings, now)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_token_replacement() {
        let (store, user) = store_with_user("tok@example.com").await;
        let now = Utc::now();

        let first = AuthToken::issue(user.id, now);
        store.replace_token(first.record.clone()).await.unwrap();
        let second = AuthToken::issue(user.id, now);
        store.replace_token(second.record.clone()).await.unwrap();

        assert!(store
            .get_token_by_digest(&first.record.digest)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .get_token_by_digest(&second.record.digest)
                .await
                .unwrap()
                .map(|t| t.user_id),
            Some(user.id)
        );

        store.delete_token_for_user(user.id).await.unwrap();
        assert!(store
            .get_token_by_digest(&second.record.digest)
            .await
            .unwrap()
            .is_none());
        // Deleting again is a no-op.
        store.delete_token_for_user(user.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_reading_invariant_enforced() {
        let (store, user) = store_with_user("inv@example.com").await;

        let result = store
            .create_reading(Reading::new(user.id, values(80, 90, 100.0), Utc::now()))
            .await;
        match result {
            Err(StoreError::Invariant(errors)) => assert!(errors.has("systolic")),
            other => panic!("expected invariant error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_reading_isolation() {
        let (store, alice) = store_with_user("alice@example.com").await;
        let bob = store
            .create_user(User::new("bob@example.com", "hash", Utc::now()))
            .await
            .unwrap();

        let reading = store
            .create_reading(Reading::new(alice.id, values(120, 80, 95.0), Utc::now()))
            .await
            .unwrap();

        assert!(store
            .get_reading(ReadingScope::Owner(bob.id), reading.id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_reading(ReadingScope::All, reading.id)
            .await
            .unwrap()
            .is_some());

        let mut hijack = reading.clone();
        hijack.notes = "mine now".to_string();
        assert!(store
            .update_reading(bob.id, hijack)
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store
            .delete_reading(bob.id, reading.id)
            .await
            .unwrap_err()
            .is_not_found());

        let (bobs, total) = store
            .list_readings(ReadingFilter::new(ReadingScope::Owner(bob.id)))
            .await
            .unwrap();
        assert!(bobs.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_update_keeps_created_at() {
        let (store, user) = store_with_user("upd@example.com").await;
        let created = Utc::now() - Duration::days(2);
        let reading = store
            .create_reading(Reading::new(user.id, values(120, 80, 95.0), created))
            .await
            .unwrap();

        let mut changed = reading.clone();
        changed.apply(values(130, 85, 100.0), Utc::now());
        changed.created_at = Utc::now();
        let updated = store.update_reading(user.id, changed).await.unwrap();

        assert_eq!(updated.created_at, created);
        assert_eq!(updated.systolic, 130);
    }

    #[tokio::test]
    async fn test_list_order_and_pagination() {
        let (store, user) = store_with_user("list@example.com").await;
        let now = Utc::now();

        for hours in [5, 1, 3] {
            store
                .create_reading(Reading::new(
                    user.id,
                    values(120, 80, 95.0),
                    now - Duration::hours(hours),
                ))
                .await
                .unwrap();
        }

        let (all, total) = store
            .list_readings(ReadingFilter::new(ReadingScope::Owner(user.id)))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert!(all.windows(2).all(|w| w[0].created_at >= w[1].created_at));
        assert_eq!(all[0].created_at, now - Duration::hours(1));

        let (page, total) = store
            .list_readings(
                ReadingFilter::new(ReadingScope::Owner(user.id)).page(Some(1), Some(1)),
            )
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].created_at, now - Duration::hours(3));
    }

    #[tokio::test]
    async fn test_delete_user_cascades() {
        let (store, user) = store_with_user("gone@example.com").await;
        let reading = store
            .create_reading(Reading::new(user.id, values(120, 80, 95.0), Utc::now()))
            .await
            .unwrap();
        let token = AuthToken::issue(user.id, Utc::now());
        store.replace_token(token.record.clone()).await.unwrap();

        store.delete_user(user.id).await.unwrap();

        assert!(store
            .get_reading(ReadingScope::All, reading.id)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_token_by_digest(&token.record.digest)
            .await
            .unwrap()
            .is_none());
    }
}
