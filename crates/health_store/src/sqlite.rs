//! SQLite health store implementation.

use std::{str::FromStr, time::Duration};

use async_trait::async_trait;
use auth::{AuthToken, ReadingScope};
use chrono::{DateTime, SecondsFormat, Utc};
use entities::{
    metrics::{ABNORMAL_DIASTOLIC, ABNORMAL_GLUCOSE, ABNORMAL_SYSTOLIC},
    normalize_email, GlucoseUnit, Permission, ProfileValues, Reading, User,
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    FromRow, Pool, QueryBuilder, Sqlite,
};
use uuid::Uuid;

use crate::{HealthStore, ReadingFilter, StoreError, StoreResult};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    email TEXT NOT NULL COLLATE NOCASE,
    first_name TEXT NOT NULL DEFAULT '',
    last_name TEXT NOT NULL DEFAULT '',
    age INTEGER,
    weight REAL,
    height REAL,
    has_diabetes BOOLEAN NOT NULL DEFAULT 0,
    has_hypertension BOOLEAN NOT NULL DEFAULT 0,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    is_staff BOOLEAN NOT NULL DEFAULT 0,
    is_superuser BOOLEAN NOT NULL DEFAULT 0,
    permissions TEXT NOT NULL DEFAULT '[]',
    password_hash TEXT NOT NULL,
    date_joined TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    last_login TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS auth_tokens (
    digest TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL UNIQUE REFERENCES users(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS readings (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    systolic INTEGER NOT NULL,
    diastolic INTEGER NOT NULL,
    glucose_level REAL NOT NULL,
    glucose_unit TEXT NOT NULL DEFAULT 'mg/dL',
    notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (systolic > diastolic)
);

CREATE INDEX IF NOT EXISTS idx_readings_user_id ON readings(user_id);
CREATE INDEX IF NOT EXISTS idx_readings_created_at ON readings(created_at);
"#;

const USER_COLUMNS: &str = "id, email, first_name, last_name, age, weight, height, \
     has_diabetes, has_hypertension, is_active, is_staff, is_superuser, permissions, \
     password_hash, date_joined, updated_at, last_login";

const READING_COLUMNS: &str = "id, user_id, systolic, diastolic, glucose_level, glucose_unit, \
     notes, created_at, updated_at";

/// Formats a timestamp so that text order matches time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(table: &'static str, value: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, format!("bad timestamp {value:?}: {e}")))
}

fn parse_uuid(table: &'static str, value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|e| StoreError::corrupt(table, format!("bad id {value:?}: {e}")))
}

/// Database row for User
#[derive(Debug, FromRow)]
struct UserRow {
    id: String,
    email: String,
    first_name: String,
    last_name: String,
    age: Option<i64>,
    weight: Option<f64>,
    height: Option<f64>,
    has_diabetes: bool,
    has_hypertension: bool,
    is_active: bool,
    is_staff: bool,
    is_superuser: bool,
    permissions: String,
    password_hash: String,
    date_joined: String,
    updated_at: String,
    last_login: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> StoreResult<Self> {
        let labels: Vec<String> = serde_json::from_str(&row.permissions)?;
        let permissions = labels
            .iter()
            .map(|l| {
                Permission::parse(l)
                    .ok_or_else(|| StoreError::corrupt("users", format!("unknown permission {l:?}")))
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let age = row
            .age
            .map(u32::try_from)
            .transpose()
            .map_err(|e| StoreError::corrupt("users", format!("bad age: {e}")))?;

        Ok(User {
            id: parse_uuid("users", &row.id)?,
            email: row.email,
            first_name: row.first_name,
            last_name: row.last_name,
            age,
            weight: row.weight,
            height: row.height,
            has_diabetes: row.has_diabetes,
            has_hypertension: row.has_hypertension,
            is_active: row.is_active,
            is_staff: row.is_staff,
            is_superuser: row.is_superuser,
            permissions,
            password_hash: row.password_hash,
            date_joined: parse_timestamp("users", &row.date_joined)?,
            updated_at: parse_timestamp("users", &row.updated_at)?,
            last_login: row
                .last_login
                .as_deref()
                .map(|v| parse_timestamp("users", v))
                .transpose()?,
        })
    }
}

/// Database row for AuthToken
#[derive(Debug, FromRow)]
struct TokenRow {
    digest: String,
    user_id: String,
    created_at: String,
}

impl TryFrom<TokenRow> for AuthToken {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> StoreResult<Self> {
        Ok(AuthToken {
            digest: row.digest,
            user_id: parse_uuid("auth_tokens", &row.user_id)?,
            created_at: parse_timestamp("auth_tokens", &row.created_at)?,
        })
    }
}

/// Database row for Reading
#[derive(Debug, FromRow)]
struct ReadingRow {
    id: String,
    user_id: String,
    systolic: i32,
    diastolic: i32,
    glucose_level: f64,
    glucose_unit: String,
    notes: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = StoreError;

    fn try_from(row: ReadingRow) -> StoreResult<Self> {
        let glucose_unit = GlucoseUnit::parse(&row.glucose_unit).ok_or_else(|| {
            StoreError::corrupt("readings", format!("unknown unit {:?}", row.glucose_unit))
        })?;

        Ok(Reading {
            id: parse_uuid("readings", &row.id)?,
            user_id: parse_uuid("readings", &row.user_id)?,
            systolic: row.systolic,
            diastolic: row.diastolic,
            glucose_level: row.glucose_level,
            glucose_unit,
            notes: row.notes,
            created_at: parse_timestamp("readings", &row.created_at)?,
            updated_at: parse_timestamp("readings", &row.updated_at)?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_foreign_key_violation())
}

fn permissions_json(user: &User) -> StoreResult<String> {
    let labels: Vec<&str> = user.permissions.iter().map(Permission::as_str).collect();
    Ok(serde_json::to_string(&labels)?)
}

fn push_reading_conditions(qb: &mut QueryBuilder<'_, Sqlite>, filter: &ReadingFilter) {
    qb.push(" WHERE 1 = 1");

    if let ReadingScope::Owner(owner) = filter.scope {
        qb.push(" AND user_id = ").push_bind(owner.to_string());
    }
    if let Some(since) = filter.created_since {
        qb.push(" AND created_at >= ")
            .push_bind(format_timestamp(since));
    }
    if filter.abnormal_only {
        qb.push(" AND (systolic >= ")
            .push_bind(ABNORMAL_SYSTOLIC)
            .push(" OR diastolic >= ")
            .push_bind(ABNORMAL_DIASTOLIC)
            .push(" OR glucose_level >= ")
            .push_bind(ABNORMAL_GLUCOSE)
            .push(")");
    }
}

/// SQLite-backed health store.
#[derive(Debug, Clone)]
pub struct SqliteHealthStore {
    pool: Pool<Sqlite>,
}

impl SqliteHealthStore {
    /// Connects to `url` (for example `sqlite:pulselog.db` or
    /// `sqlite::memory:`), creating the database file and schema if needed.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Each connection to an in-memory database sees its own database.
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.run_migrations().await?;

        tracing::info!(url = %url, "Connected to SQLite health store");
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn fetch_user(&self, id: Uuid) -> StoreResult<User> {
        self.get_user(id)
            .await?
            .ok_or_else(|| StoreError::not_found("User", id.to_string()))
    }

    async fn fetch_reading(&self, scope: ReadingScope, id: Uuid) -> StoreResult<Option<Reading>> {
        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {READING_COLUMNS} FROM readings"));
        push_reading_conditions(&mut qb, &ReadingFilter::new(scope));
        qb.push(" AND id = ").push_bind(id.to_string());

        let row: Option<ReadingRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        row.map(Reading::try_from).transpose()
    }
}

#[async_trait]
impl HealthStore for SqliteHealthStore {
    // =========================================================================
    // User operations
    // =========================================================================

    async fn create_user(&self, mut user: User) -> StoreResult<User> {
        user.email = normalize_email(&user.email);

        let result = sqlx::query(&format!(
            "INSERT INTO users ({USER_COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.age.map(i64::from))
        .bind(user.weight)
        .bind(user.height)
        .bind(user.has_diabetes)
        .bind(user.has_hypertension)
        .bind(user.is_active)
        .bind(user.is_staff)
        .bind(user.is_superuser)
        .bind(permissions_json(&user)?)
        .bind(&user.password_hash)
        .bind(format_timestamp(user.date_joined))
        .bind(format_timestamp(user.updated_at))
        .bind(user.last_login.map(format_timestamp))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(user),
            Err(e) if is_unique_violation(&e) => Err(StoreError::already_exists("User", user.email)),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await?;

        row.map(User::try_from).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
                .bind(normalize_email(email))
                .fetch_optional(&self.pool)
                .await?;

        row.map(User::try_from).transpose()
    }

    async fn update_profile(
        &self,
        id: Uuid,
        profile: ProfileValues,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        let email = normalize_email(&profile.email);

        let result = sqlx::query(
            "UPDATE users SET email = ?, first_name = ?, last_name = ?, age = ?, weight = ?,
                 height = ?, has_diabetes = ?, has_hypertension = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&email)
        .bind(&profile.first_name)
        .bind(&profile.last_name)
        .bind(profile.age.map(i64::from))
        .bind(profile.weight)
        .bind(profile.height)
        .bind(profile.has_diabetes)
        .bind(profile.has_hypertension)
        .bind(format_timestamp(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                return Err(StoreError::not_found("User", id.to_string()));
            }
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(StoreError::already_exists("User", email));
            }
            Err(e) => return Err(e.into()),
        }

        self.fetch_user(id).await
    }

    async fn record_login(&self, id: Uuid, at: DateTime<Utc>) -> StoreResult<User> {
        let result = sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
            .bind(format_timestamp(at))
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("User", id.to_string()));
        }
        self.fetch_user(id).await
    }

    async fn grant_permission(
        &self,
        id: Uuid,
        permission: Permission,
        now: DateTime<Utc>,
    ) -> StoreResult<User> {
        // Appends in place so concurrent writers never lose each other's grants.
        sqlx::query(
            "UPDATE users SET permissions = json_insert(permissions, '$[#]', ?1), updated_at = ?2
             WHERE id = ?3
               AND NOT EXISTS (SELECT 1 FROM json_each(users.permissions) WHERE value = ?1)",
        )
        .bind(permission.as_str())
        .bind(format_timestamp(now))
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        self.fetch_user(id).await
    }

    async fn delete_user(&self, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("User", id.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Token operations
    // =========================================================================

    async fn replace_token(&self, token: AuthToken) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM auth_tokens WHERE user_id = ?")
            .bind(token.user_id.to_string())
            .execute(&mut *tx)
            .await?;

        let inserted = sqlx::query(
            "INSERT INTO auth_tokens (digest, user_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(&token.digest)
        .bind(token.user_id.to_string())
        .bind(format_timestamp(token.created_at))
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(e) if is_foreign_key_violation(&e) => {
                return Err(StoreError::not_found("User", token.user_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_token_by_digest(&self, digest: &str) -> StoreResult<Option<AuthToken>> {
        let row: Option<TokenRow> =
            sqlx::query_as("SELECT digest, user_id, created_at FROM auth_tokens WHERE digest = ?")
                .bind(digest)
                .fetch_optional(&self.pool)
                .await?;

        row.map(AuthToken::try_from).transpose()
    }

    async fn delete_token_for_user(&self, user_id: Uuid) -> StoreResult<()> {
        sqlx::query("DELETE FROM auth_tokens WHERE user_id = ?")
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Reading operations
    // =========================================================================

    async fn create_reading(&self, reading: Reading) -> StoreResult<Reading> {
        reading.check_invariants()?;

        let result = sqlx::query(&format!(
            "INSERT INTO readings ({READING_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(reading.id.to_string())
        .bind(reading.user_id.to_string())
        .bind(reading.systolic)
        .bind(reading.diastolic)
        .bind(reading.glucose_level)
        .bind(reading.glucose_unit.as_str())
        .bind(&reading.notes)
        .bind(format_timestamp(reading.created_at))
        .bind(format_timestamp(reading.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(reading),
            Err(e) if is_foreign_key_violation(&e) => Err(StoreError::not_found(
                "User",
                reading.user_id.to_string(),
            )),
            Err(e) if is_unique_violation(&e) => Err(StoreError::already_exists(
                "Reading",
                reading.id.to_string(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_reading(&self, scope: ReadingScope, id: Uuid) -> StoreResult<Option<Reading>> {
        self.fetch_reading(scope, id).await
    }

    async fn list_readings(&self, filter: ReadingFilter) -> StoreResult<(Vec<Reading>, u32)> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM readings");
        push_reading_conditions(&mut count, &filter);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::<Sqlite>::new(format!("SELECT {READING_COLUMNS} FROM readings"));
        push_reading_conditions(&mut qb, &filter);
        qb.push(" ORDER BY created_at DESC, id DESC");

        if filter.limit.is_some() || filter.offset.is_some() {
            // SQLite needs a LIMIT clause before OFFSET; -1 means unbounded.
            qb.push(" LIMIT ")
                .push_bind(filter.limit.map_or(-1, i64::from))
                .push(" OFFSET ")
                .push_bind(i64::from(filter.offset.unwrap_or(0)));
        }

        let rows: Vec<ReadingRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        let readings = rows
            .into_iter()
            .map(Reading::try_from)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok((readings, total as u32))
    }

    async fn update_reading(&self, owner: Uuid, reading: Reading) -> StoreResult<Reading> {
        reading.check_invariants()?;

        let result = sqlx::query(
            "UPDATE readings SET systolic = ?, diastolic = ?, glucose_level = ?,
                 glucose_unit = ?, notes = ?, updated_at = ?
             WHERE id = ? AND user_id = ?",
        )
        .bind(reading.systolic)
        .bind(reading.diastolic)
        .bind(reading.glucose_level)
        .bind(reading.glucose_unit.as_str())
        .bind(&reading.notes)
        .bind(format_timestamp(reading.updated_at))
        .bind(reading.id.to_string())
        .bind(owner.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Reading", reading.id.to_string()));
        }

        self.fetch_reading(ReadingScope::Owner(owner), reading.id)
            .await?
            .ok_or_else(|| StoreError::not_found("Reading", reading.id.to_string()))
    }

    async fn delete_reading(&self, owner: Uuid, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM readings WHERE id = ? AND user_id = ?")
            .bind(id.to_string())
            .bind(owner.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("Reading", id.to_string()));
        }
        Ok(())
    }
}
