//! Account provisioning for operators.
//!
//! Backs the `create-superuser` and `grant` subcommands of the server binary.

use auth::PasswordContext;
use entities::{Permission, User, ValidationErrors, normalize_email, validation::is_valid_email};

use crate::{
    api::{auth::hash_password, users::email_taken},
    error::{ServerError, ServerResult},
    state::AppState,
};

/// Creates an active staff superuser. Superusers hold every permission,
/// including review access to all readings.
pub async fn create_superuser(state: &AppState, email: &str, password: &str) -> ServerResult<User> {
    let email = normalize_email(email);
    let mut errors = ValidationErrors::new();

    if !is_valid_email(&email) {
        errors.add("email", "Enter a valid email address.");
    }

    let context = PasswordContext {
        email: &email,
        first_name: "",
        last_name: "",
    };
    if let Err(e) = state.password_policy.check("password", password, &context) {
        errors.merge(e);
    }

    if !errors.is_empty() {
        return Err(ServerError::Validation(errors));
    }

    if email_taken(state, &email, None).await? {
        return Err(ServerError::field(
            "email",
            "user with this email already exists.",
        ));
    }

    let password_hash = hash_password(state, password).await?;
    let user = state
        .store
        .create_user(User::superuser(&email, password_hash, state.clock.now()))
        .await?;

    tracing::info!(user_id = %user.id, "Created superuser");
    Ok(user)
}

/// Grants a permission to the user registered under `email`.
pub async fn grant_permission(
    state: &AppState,
    email: &str,
    permission: Permission,
) -> ServerResult<User> {
    let user = state
        .store
        .get_user_by_email(email)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("No user with email {email}.")))?;

    let user = state
        .store
        .grant_permission(user.id, permission, state.clock.now())
        .await?;

    tracing::info!(
        user_id = %user.id,
        permission = permission.as_str(),
        "Granted permission"
    );
    Ok(user)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use auth::Argon2Hasher;
    use health_store::MemoryHealthStore;

    use super::*;
    use crate::config::ServerConfig;

    fn state() -> AppState {
        AppState::from_parts(ServerConfig::for_tests(), Arc::new(MemoryHealthStore::new()))
            .with_hasher(Arc::new(Argon2Hasher::with_cost(64, 1).unwrap()))
    }

    #[tokio::test]
    async fn test_create_superuser() {
        let state = state();
        let user = create_superuser(&state, " Root@Example.com ", "Tr1cky-Sphinx-42")
            .await
            .unwrap();

        assert_eq!(user.email, "root@example.com");
        assert!(user.is_superuser);
        assert!(user.is_staff);
        assert!(user.has_permission(Permission::ViewAllReadings));
        assert!(user.password_hash.starts_with("$argon2id$"));

        let again = create_superuser(&state, "ROOT@example.com", "Tr1cky-Sphinx-42").await;
        assert!(matches!(again, Err(ServerError::Validation(e)) if e.has("email")));
    }

    #[tokio::test]
    async fn test_create_superuser_validates_input() {
        let state = state();
        let result = create_superuser(&state, "not-an-email", "12345678").await;

        match result {
            Err(ServerError::Validation(errors)) => {
                assert!(errors.has("email"));
                assert!(errors.has("password"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_grant_permission() {
        let state = state();
        let missing = grant_permission(&state, "nobody@example.com", Permission::ViewAllReadings).await;
        assert!(matches!(missing, Err(ServerError::NotFound(_))));

        state
            .store
            .create_user(User::new("rita@example.com", "hash", state.clock.now()))
            .await
            .unwrap();

        let user = grant_permission(&state, "Rita@Example.com", Permission::ViewAllReadings)
            .await
            .unwrap();
        assert_eq!(user.permissions, vec![Permission::ViewAllReadings]);
        assert!(!user.is_superuser);
    }
}
