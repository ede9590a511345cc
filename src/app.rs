// src/app.rs
//! Router composition shared by the server binary and the HTTP tests

use axum::{
    body::Body,
    extract::Extension,
    http::{header, HeaderName, HeaderValue, Method, Request},
    middleware,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::common::{health::health_handler, AppState};
use crate::{auth, logging_middleware, oauth};

pub fn build_app(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let shared = Arc::new(RwLock::new(state));

    Router::new()
        // ====================================================================
        // LOCAL ACCOUNTS AND SESSIONS
        // ====================================================================
        .merge(auth::auth_routes())
        // ====================================================================
        // PROVIDER CONNECTIONS AND SOCIAL SIGN-IN
        // ====================================================================
        .merge(oauth::oauth_routes())
        .route("/api/health", get(health_handler))
        // ====================================================================
        // MIDDLEWARE AND LAYERS
        // ====================================================================
        .layer(middleware::from_fn(logging_middleware::log_request_response))
        .layer(Extension(shared))
        .layer(cors)
        .layer(
            // path only: callback query strings carry authorization codes
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                )
            }),
        )
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-request-id"),
        ])
        .allow_credentials(true)
}
