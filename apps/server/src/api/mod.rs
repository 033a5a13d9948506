//! API endpoints.

pub mod auth;
pub mod readings;
pub mod users;

use axum::{
    Router,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::{
    middleware::{auth_middleware, throttle_middleware},
    state::AppState,
};

/// Creates the API router with all endpoints.
pub fn create_router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route(
            "/v1/auth/register",
            post(auth::register)
                .route_layer(from_fn_with_state(state.clone(), throttle_middleware)),
        )
        .route("/v1/auth/login", post(auth::login));

    let protected = Router::new()
        // Auth endpoints
        .route("/v1/auth/logout", post(auth::logout))
        // Profile endpoints
        .route(
            "/v1/users/me",
            get(users::get_me)
                .patch(users::update_me)
                .delete(users::delete_me),
        )
        // Reading endpoints
        .route(
            "/v1/readings",
            get(readings::list_readings).post(readings::create_reading),
        )
        .route("/v1/readings/recent", get(readings::recent_readings))
        .route("/v1/readings/abnormal", get(readings::abnormal_readings))
        .route(
            "/v1/readings/{id}",
            get(readings::get_reading)
                .put(readings::replace_reading)
                .patch(readings::update_reading)
                .delete(readings::delete_reading),
        )
        // Reviewer endpoints
        .route("/v1/review/readings", get(readings::review_readings))
        .route("/v1/review/readings/{id}", get(readings::review_reading))
        .route_layer(from_fn_with_state(state, auth_middleware));

    Router::new()
        .route("/health", get(health_check))
        .merge(public)
        .merge(protected)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
