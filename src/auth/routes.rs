//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /api/auth/register` - Create a local account
/// - `POST /api/auth/login` - Username/password login
/// - `POST /api/auth/logout` - Revoke all sessions of the caller
/// - `POST /api/auth/handoff` - Redeem a social sign-in handoff code
/// - `GET /api/me` - Current user information
/// - `GET /api/users/:id` - User profile (self or admin)
pub fn auth_routes() -> Router {
    Router::new()
        .route("/api/auth/register", post(handlers::register_handler))
        .route("/api/auth/login", post(handlers::login_handler))
        .route("/api/auth/logout", post(handlers::logout_handler))
        .route("/api/auth/handoff", post(handlers::handoff_handler))
        .route("/api/me", get(handlers::me_handler))
        .route("/api/users/:id", get(handlers::get_user_handler))
}
