use axum::{
    routing::{get, post},
    Router,
};

pub mod auth;
pub mod sessions;
pub mod system;

/// Endpoints reachable without an access token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/auth", auth::router())
}

/// Endpoints behind the bearer middleware.
pub fn protected_router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/revoke-all", post(sessions::revoke_all))
}
