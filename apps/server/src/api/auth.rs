//! Registration, login and logout endpoints.

use auth::{AuthError, AuthToken, Caller, PasswordContext, check_credentials};
use axum::{Extension, Json, extract::State, http::StatusCode};
use entities::{
    User, ValidationErrors, normalize_email,
    validation::{ProfilePayload, validate_profile},
};
use serde::{Deserialize, Serialize};

use crate::{
    api::users::{UserResponse, email_taken},
    error::{ServerError, ServerResult},
    extract::ApiJson,
    state::AppState,
};

const REQUIRED: &str = "This field is required.";

/// Request body for registration.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub password: Option<String>,
    pub password2: Option<String>,
    #[serde(flatten)]
    pub profile: ProfilePayload,
}

/// Request body for login.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Response body for login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

/// Registers a new account.
pub async fn register(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RegisterRequest>,
) -> ServerResult<(StatusCode, Json<UserResponse>)> {
    let mut errors = ValidationErrors::new();

    let profile = validate_profile(&request.profile, None)
        .map_err(|e| errors.merge(e))
        .ok();

    let password = match (&request.password, &request.password2) {
        (None, _) => {
            errors.add("password", REQUIRED);
            None
        }
        (Some(_), None) => {
            errors.add("password2", REQUIRED);
            None
        }
        (Some(password), Some(password2)) if password != password2 => {
            errors.add("password", "Password fields didn't match.");
            None
        }
        (Some(password), Some(_)) => Some(password.as_str()),
    };

    if let Some(password) = password {
        let context = PasswordContext {
            email: request.profile.email.as_deref().unwrap_or_default(),
            first_name: request.profile.first_name.as_deref().unwrap_or_default(),
            last_name: request.profile.last_name.as_deref().unwrap_or_default(),
        };
        if let Err(e) = state.password_policy.check("password", password, &context) {
            errors.merge(e);
        }
    }

    let (Some(profile), Some(password), true) = (profile, password, errors.is_empty()) else {
        return Err(ServerError::Validation(errors));
    };

    if email_taken(&state, &profile.email, None).await? {
        return Err(ServerError::field(
            "email",
            "user with this email already exists.",
        ));
    }

    let password_hash = hash_password(&state, password).await?;
    let user = state
        .store
        .create_user(User::from_profile(profile, password_hash, state.clock.now()))
        .await?;

    tracing::info!(user_id = %user.id, "Registered user");
    Ok((StatusCode::CREATED, Json(UserResponse::from(&user))))
}

/// Exchanges email and password for a token.
pub async fn login(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LoginRequest>,
) -> ServerResult<Json<LoginResponse>> {
    let mut errors = ValidationErrors::new();
    if request.email.as_deref().is_none_or(|e| e.trim().is_empty()) {
        errors.add("email", REQUIRED);
    }
    if request.password.as_deref().is_none_or(str::is_empty) {
        errors.add("password", REQUIRED);
    }
    let (Some(email), Some(password), true) = (request.email, request.password, errors.is_empty())
    else {
        return Err(ServerError::Validation(errors));
    };

    let user = state
        .store
        .get_user_by_email(&normalize_email(&email))
        .await?;
    let user = verify_password(&state, user, password).await?;

    // The account may have changed while the password was being checked.
    let user = state
        .store
        .get_user(user.id)
        .await?
        .ok_or(AuthError::InvalidCredentials)?;
    if !user.is_active {
        return Err(AuthError::InactiveUser.into());
    }

    let now = state.clock.now();
    let issued = AuthToken::issue(user.id, now);
    state.store.replace_token(issued.record).await?;
    let user = state.store.record_login(user.id, now).await?;

    tracing::info!(user_id = %user.id, "User logged in");
    Ok(Json(LoginResponse {
        token: issued.key,
        user: UserResponse::from(&user),
    }))
}

/// Revokes the caller's token.
pub async fn logout(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ServerResult<StatusCode> {
    state.store.delete_token_for_user(caller.user_id).await?;

    tracing::info!(user_id = %caller.user_id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// Hashes a password on the blocking pool.
pub(crate) async fn hash_password(state: &AppState, password: &str) -> ServerResult<String> {
    let hasher = state.hasher.clone();
    let password = password.to_string();
    let hash = tokio::task::spawn_blocking(move || hasher.hash(&password))
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(hash)
}

/// Checks the password against `user` on the blocking pool and returns the
/// user on success.
async fn verify_password(
    state: &AppState,
    user: Option<User>,
    password: String,
) -> ServerResult<User> {
    let hasher = state.hasher.clone();
    let user = tokio::task::spawn_blocking(move || {
        check_credentials(hasher.as_ref(), user.as_ref(), &password)?;
        user.ok_or(AuthError::InvalidCredentials)
    })
    .await
    .map_err(|e| ServerError::Internal(e.to_string()))??;
    Ok(user)
}
