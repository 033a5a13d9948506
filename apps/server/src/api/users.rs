//! Profile endpoints for the authenticated user.

use auth::Caller;
use axum::{Extension, Json, extract::State, http::StatusCode};
use chrono::{DateTime, Utc};
use entities::{
    User,
    validation::{ProfilePayload, validate_profile},
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{ServerError, ServerResult},
    extract::ApiJson,
    state::AppState,
};

/// Public profile of a user. Never carries the password hash.
#[derive(Debug, Clone, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub full_name: String,
    pub age: Option<u32>,
    pub weight: Option<f64>,
    pub height: Option<f64>,
    pub bmi: Option<f64>,
    pub has_diabetes: bool,
    pub has_hypertension: bool,
    pub date_joined: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            full_name: user.full_name(),
            age: user.age,
            weight: user.weight,
            height: user.height,
            bmi: user.bmi(),
            has_diabetes: user.has_diabetes,
            has_hypertension: user.has_hypertension,
            date_joined: user.date_joined,
        }
    }
}

/// Loads the caller's user record.
pub(crate) async fn load_caller(state: &AppState, caller: &Caller) -> ServerResult<User> {
    state
        .store
        .get_user(caller.user_id)
        .await?
        .ok_or_else(|| ServerError::NotFound("User not found.".into()))
}

/// Returns true if `email` belongs to a user other than `except`.
pub(crate) async fn email_taken(
    state: &AppState,
    email: &str,
    except: Option<Uuid>,
) -> ServerResult<bool> {
    let existing = state.store.get_user_by_email(email).await?;
    Ok(existing.is_some_and(|user| Some(user.id) != except))
}

/// Gets the caller's profile.
pub async fn get_me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServerResult<Json<UserResponse>> {
    let user = load_caller(&state, &caller).await?;
    Ok(Json(UserResponse::from(&user)))
}

/// Partially updates the caller's profile.
pub async fn update_me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(payload): ApiJson<ProfilePayload>,
) -> ServerResult<Json<UserResponse>> {
    let current = load_caller(&state, &caller).await?;
    let profile = validate_profile(&payload, Some(&current.profile()))?;

    if profile.email != current.email
        && email_taken(&state, &profile.email, Some(current.id)).await?
    {
        return Err(ServerError::field(
            "email",
            "user with this email already exists.",
        ));
    }

    let user = state
        .store
        .update_profile(current.id, profile, state.clock.now())
        .await?;

    tracing::info!(user_id = %user.id, "Updated profile");
    Ok(Json(UserResponse::from(&user)))
}

/// Deletes the caller's account with all of their readings.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServerResult<StatusCode> {
    state.store.delete_user(caller.user_id).await?;

    tracing::info!(user_id = %caller.user_id, "Deleted account");
    Ok(StatusCode::NO_CONTENT)
}
