//! Authentication handlers

use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::extractors::AuthedUser;
use super::models::{
    HandoffRequest, LoginRequest, NewUser, PublicUser, RegisterRequest, Role, SessionResponse,
    User,
};
use super::password::{hash_password_blocking, verify_password_blocking};
use super::validators::CredentialsValidator;
use crate::common::config::AdminBootstrap;
use crate::common::{safe_email_log, ApiError, AppState, Validator};
use crate::storage::{Storage, StorageError};

/// POST /api/auth/register
/// Creates a local account and returns a session
///
/// # Request Body
/// ```json
/// { "username": "alice", "password": "s3cretpass", "email": "alice@example.com" }
/// ```
///
/// # Response (201)
/// ```json
/// { "token": "<jwt>", "user": { ... } }
/// ```
pub async fn register_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let state = state_lock.read().await.clone();

    let validation = CredentialsValidator.validate(&payload);
    if !validation.is_valid {
        return Err(validation.into());
    }

    let password_hash = hash_password_blocking(payload.password.clone())
        .await
        .map_err(|e| {
            error!(error = %e, "Password hashing failed");
            ApiError::InternalServer("could not create account".to_string())
        })?;

    let email = payload
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let user = state
        .storage
        .create_user(NewUser {
            username: payload.username.trim().to_string(),
            password_hash,
            email,
            display_name: None,
            profile_image: None,
            role: Role::Free,
        })
        .await?;

    info!(
        user_id = %user.id,
        username = %user.username,
        email = %user.email.as_deref().map(safe_email_log).unwrap_or_default(),
        "User registered"
    );

    let response = session_response(&state, &user)?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/login
/// Exchanges username and password for a session
pub async fn login_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let validation = CredentialsValidator.validate(&payload);
    if !validation.is_valid {
        return Err(validation.into());
    }

    let user = state
        .storage
        .get_user_by_username(payload.username.trim())
        .await?;

    // Same answer and the same Argon2 cost for unknown user and wrong password
    let verified = verify_password_blocking(
        user.as_ref().map(|u| u.password_hash.clone()),
        payload.password.clone(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Password verification failed");
        ApiError::InternalServer("could not verify credentials".to_string())
    })?;

    let user = match user {
        Some(u) if verified => u,
        _ => {
            warn!(username = %payload.username.trim(), "Login failed");
            return Err(ApiError::Unauthorized("invalid credentials".to_string()));
        }
    };

    info!(user_id = %user.id, "User logged in");
    Ok(Json(session_response(&state, &user)?))
}

/// POST /api/auth/logout
/// Revokes every session credential issued to the caller so far
///
/// # Response
/// ```json
/// { "message": "Logout successful" }
/// ```
pub async fn logout_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let version = state.storage.bump_session_version(authed.id).await?;
    info!(user_id = %authed.id, session_version = version, "User logout successful");

    Ok(Json(serde_json::json!({
        "message": "Logout successful"
    })))
}

/// POST /api/auth/handoff
/// Redeems the single-use code from a social sign-in redirect for a session
pub async fn handoff_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Json(payload): Json<HandoffRequest>,
) -> Result<Json<SessionResponse>, ApiError> {
    let state = state_lock.read().await.clone();

    let user_id = state.oauth_service.redeem_handoff(payload.code.trim()).await?;
    let user = state
        .storage
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user no longer exists".to_string()))?;

    info!(user_id = %user.id, "Sign-in handoff redeemed");
    Ok(Json(session_response(&state, &user)?))
}

/// GET /api/me
/// Returns the current authenticated user's information
///
/// # Response
/// ```json
/// { "user": { ... }, "is_admin": false }
/// ```
pub async fn me_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();

    let user = state
        .storage
        .get_user(authed.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".to_string()))?;

    Ok(Json(serde_json::json!({
        "user": PublicUser::from(&user),
        "is_admin": authed.is_admin(),
    })))
}

/// GET /api/users/:id
/// Own profile, or any profile for admins
pub async fn get_user_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(id): Path<i64>,
) -> Result<Json<PublicUser>, ApiError> {
    let state = state_lock.read().await.clone();
    let id = authed.target(Some(id))?;

    let user = state
        .storage
        .get_user(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("user {} not found", id)))?;

    Ok(Json(PublicUser::from(&user)))
}

// ---- Helper Functions ----

fn session_response(state: &AppState, user: &User) -> Result<SessionResponse, ApiError> {
    let token = state.sessions.issue(user).map_err(|e| {
        error!(error = %e, user_id = %user.id, "JWT encoding error");
        ApiError::InternalServer("jwt error".to_string())
    })?;

    Ok(SessionResponse {
        token,
        user: PublicUser::from(user),
    })
}

/// Create the configured admin account unless the username already exists
pub async fn ensure_admin(
    storage: &dyn Storage,
    bootstrap: &AdminBootstrap,
) -> Result<(), StorageError> {
    if storage
        .get_user_by_username(&bootstrap.username)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let password_hash = hash_password_blocking(bootstrap.password.clone())
        .await
        .map_err(|e| StorageError::Corrupt(format!("admin password hashing failed: {}", e)))?;

    let admin = storage
        .create_user(NewUser {
            username: bootstrap.username.clone(),
            password_hash,
            email: None,
            display_name: None,
            profile_image: None,
            role: Role::Admin,
        })
        .await?;

    info!(user_id = %admin.id, username = %admin.username, "Admin account created");
    Ok(())
}
