//! Provider connection routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the provider connection router
///
/// # Routes
/// - `GET /api/auth/:provider` - Start the authorization flow (302)
/// - `GET /api/auth/:provider/callback` - Provider redirect target
/// - `POST /api/auth/:provider/refresh` - Refresh stored provider tokens
/// - `POST /api/auth/:provider/disconnect` - Drop tokens and identity link
/// - `GET /api/auth/:provider/status` - Connected flag and profile
pub fn oauth_routes() -> Router {
    Router::new()
        .route("/api/auth/:provider", get(handlers::start_handler))
        .route("/api/auth/:provider/callback", get(handlers::callback_handler))
        .route("/api/auth/:provider/refresh", post(handlers::refresh_handler))
        .route(
            "/api/auth/:provider/disconnect",
            post(handlers::disconnect_handler),
        )
        .route("/api/auth/:provider/status", get(handlers::status_handler))
}
