//! Canned reading queries.

use auth::ReadingScope;
use chrono::{DateTime, Duration, Utc};
use entities::Reading;
use uuid::Uuid;

use crate::{HealthStore, ReadingFilter, StoreResult};

/// Length of the "recent" window in days.
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Returns `owner`'s readings created within the last seven days of `now`,
/// newest first. A reading exactly seven days old is included.
pub async fn recent_readings(
    store: &dyn HealthStore,
    owner: Uuid,
    now: DateTime<Utc>,
) -> StoreResult<Vec<Reading>> {
    let since = now - Duration::days(RECENT_WINDOW_DAYS);
    let filter = ReadingFilter::new(ReadingScope::Owner(owner)).created_since(since);
    let (readings, _) = store.list_readings(filter).await?;
    Ok(readings)
}

/// Returns `owner`'s abnormal readings, newest first.
pub async fn abnormal_readings(store: &dyn HealthStore, owner: Uuid) -> StoreResult<Vec<Reading>> {
    let filter = ReadingFilter::new(ReadingScope::Owner(owner)).abnormal_only();
    let (readings, _) = store.list_readings(filter).await?;
    Ok(readings)
}

#[cfg(test)]
mod tests {
    use entities::{GlucoseUnit, ReadingValues, User};

    use super::*;
    use crate::MemoryHealthStore;

    fn values(systolic: i32, diastolic: i32, glucose_level: f64) -> ReadingValues {
        ReadingValues {
            systolic,
            diastolic,
            glucose_level,
            glucose_unit: GlucoseUnit::MgDl,
            notes: String::new(),
        }
    }

    async fn add(store: &MemoryHealthStore, owner: Uuid, v: ReadingValues, at: DateTime<Utc>) {
        store
            .create_reading(Reading::new(owner, v, at))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recent_boundary_is_inclusive() {
        let store = MemoryHealthStore::new();
        let user = store
            .create_user(User::new("recent@example.com", "hash", Utc::now()))
            .await
            .unwrap();
        let now = Utc::now();
        let week = Duration::days(RECENT_WINDOW_DAYS);

        add(&store, user.id, values(120, 80, 90.0), now - week).await;
        add(
            &store,
            user.id,
            values(121, 80, 90.0),
            now - week - Duration::seconds(1),
        )
        .await;
        add(&store, user.id, values(122, 80, 90.0), now).await;

        let recent = recent_readings(&store, user.id, now).await.unwrap();
        let systolics: Vec<i32> = recent.iter().map(|r| r.systolic).collect();
        assert_eq!(systolics, vec![122, 120]);
    }

    #[tokio::test]
    async fn test_abnormal_only_for_owner() {
        let store = MemoryHealthStore::new();
        let alice = store
            .create_user(User::new("alice@example.com", "hash", Utc::now()))
            .await
            .unwrap();
        let bob = store
            .create_user(User::new("bob@example.com", "hash", Utc::now()))
            .await
            .unwrap();
        let now = Utc::now();

        add(&store, alice.id, values(140, 70, 90.0), now).await;
        add(&store, alice.id, values(120, 90, 90.0), now - Duration::hours(1)).await;
        add(&store, alice.id, values(120, 70, 200.0), now - Duration::hours(2)).await;
        add(&store, alice.id, values(139, 89, 199.9), now - Duration::hours(3)).await;
        add(&store, bob.id, values(180, 110, 300.0), now).await;

        let abnormal = abnormal_readings(&store, alice.id).await.unwrap();
        assert_eq!(abnormal.len(), 3);
        assert!(abnormal.iter().all(|r| r.user_id == alice.id));
        assert!(abnormal.iter().all(Reading::is_abnormal));
    }
}
