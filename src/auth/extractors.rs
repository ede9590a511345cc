//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::models::Role;
use crate::common::{ApiError, AppState};

/// Authenticated user extractor
///
/// Validates the bearer JWT, loads the user from storage and rejects
/// credentials issued before the user's last logout.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

impl AuthedUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Resolve the user an operation targets: self by default, others only for admins
    pub fn target(&self, requested: Option<i64>) -> Result<i64, ApiError> {
        match requested {
            None => Ok(self.id),
            Some(id) if id == self.id || self.is_admin() => Ok(id),
            Some(id) => {
                warn!(
                    user_id = %self.id,
                    target_user_id = %id,
                    "Attempt to act on another user's account"
                );
                Err(ApiError::Forbidden(
                    "cannot act on another user's account".to_string(),
                ))
            }
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(state_lock): Extension<Arc<RwLock<AppState>>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        let app_state = state_lock.read().await.clone();

        let token = match parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
        {
            Some(t) => t,
            None => {
                warn!("Authentication failed: missing Authorization header");
                return Err(ApiError::Unauthorized("missing auth".into()));
            }
        };

        // Handle "Bearer <token>" format or raw token
        let bare_token = token.strip_prefix("Bearer ").unwrap_or(token).trim();

        let claims = app_state.sessions.verify(bare_token).map_err(|e| {
            warn!(error = %e, "JWT token validation failed");
            ApiError::Unauthorized("invalid token".into())
        })?;

        let user_id: i64 = claims.sub.parse().map_err(|_| {
            warn!(sub = %claims.sub, "JWT subject is not a user id");
            ApiError::Unauthorized("invalid token".into())
        })?;

        let user = match app_state.storage.get_user(user_id).await? {
            Some(u) => u,
            None => {
                warn!(user_id = %user_id, "Authentication failed: user not found");
                return Err(ApiError::Unauthorized("user not found".into()));
            }
        };

        if claims.ver != user.session_version {
            warn!(
                user_id = %user_id,
                token_version = claims.ver,
                current_version = user.session_version,
                "Authentication failed: session revoked"
            );
            return Err(ApiError::Unauthorized("session revoked".into()));
        }

        debug!(user_id = %user.id, role = %user.role, "User authenticated via extractor");
        Ok(AuthedUser {
            id: user.id,
            username: user.username,
            role: user.role,
        })
    }
}
