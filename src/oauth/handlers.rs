//! Provider connection handlers

use axum::extract::{Extension, Json, Path, Query};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::flow::{CallbackOutcome, FlowError};
use super::models::{
    CallbackParams, ConnectionStatus, FlowPurpose, ProviderKind, StartParams, UserTarget,
};
use crate::auth::AuthedUser;
use crate::common::{ApiError, AppState};

fn parse_provider(raw: &str) -> Result<ProviderKind, ApiError> {
    raw.parse::<ProviderKind>()
        .map_err(|name| FlowError::UnknownProvider(name).into())
}

/// 302 with a Location header; axum's `Redirect::to` answers 303
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| v.contains("application/json"))
}

/// GET /api/auth/:provider?userId=<id>
/// Redirects the browser to the provider's consent page
pub async fn start_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Path(provider): Path<String>,
    Query(params): Query<StartParams>,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let kind = parse_provider(&provider)?;

    let user_id = match params.user_id.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
            ApiError::BadRequest("userId must be a numeric user id".to_string())
        })?),
    };

    let request = state
        .oauth_service
        .begin_authorization(kind, user_id)
        .await?;

    Ok(found(&request.url))
}

/// GET /api/auth/:provider/callback?code=<c>&state=<s>
/// Completes the flow and redirects to the client with a success or error indicator.
/// Requests sending `Accept: application/json` get a JSON body instead.
pub async fn callback_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    Query(params): Query<CallbackParams>,
) -> Result<Response, ApiError> {
    let state = state_lock.read().await.clone();
    let kind = parse_provider(&provider)?;
    let purpose = state.oauth_service.provider(kind)?.purpose;
    let frontend = state.config.frontend_url.as_str();

    let result = state.oauth_service.handle_callback(kind, params).await;

    if wants_json(&headers) {
        let body = match result? {
            CallbackOutcome::Linked { user_id, identity } => serde_json::json!({
                "provider": kind,
                "userId": user_id,
                "connected": true,
                "profilePending": false,
                "profile": identity,
            }),
            CallbackOutcome::ProfilePending { user_id } => serde_json::json!({
                "provider": kind,
                "userId": user_id,
                "connected": true,
                "profilePending": true,
                "profile": null,
            }),
            CallbackOutcome::SignedIn {
                user_id,
                handoff,
                created,
            } => serde_json::json!({
                "provider": kind,
                "userId": user_id,
                "handoff": handoff,
                "created": created,
            }),
        };
        return Ok(Json(body).into_response());
    }

    let location = match (purpose, result) {
        (_, Ok(CallbackOutcome::Linked { .. })) => {
            format!("{}/settings?connected=true&provider={}", frontend, kind)
        }
        (_, Ok(CallbackOutcome::ProfilePending { .. })) => format!(
            "{}/settings?connected=true&provider={}&profile=pending",
            frontend, kind
        ),
        (_, Ok(CallbackOutcome::SignedIn { handoff, .. })) => format!(
            "{}/dashboard?auth=success&provider={}&handoff={}",
            frontend,
            kind,
            urlencoding::encode(&handoff)
        ),
        (FlowPurpose::Link, Err(e)) => {
            let message = ApiError::from(e).public_message();
            format!(
                "{}/settings?error={}&provider={}",
                frontend,
                urlencoding::encode(&message),
                kind
            )
        }
        (FlowPurpose::SignIn, Err(e)) => {
            let message = ApiError::from(e).public_message();
            format!(
                "{}/login?error={}&provider={}",
                frontend,
                urlencoding::encode(&message),
                kind
            )
        }
    };

    Ok(found(&location))
}

/// POST /api/auth/:provider/refresh
///
/// # Request Body (optional)
/// ```json
/// { "userId": 42 }
/// ```
///
/// # Response
/// ```json
/// { "message": "Token refreshed", "expiresAt": "2024-01-01T12:00:00Z" }
/// ```
pub async fn refresh_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    body: Option<Json<UserTarget>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();
    let kind = parse_provider(&provider)?;
    let user_id = authed.target(body.and_then(|Json(t)| t.user_id))?;

    let record = state.oauth_service.refresh(kind, user_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Token refreshed",
        "expiresAt": record.expires_at,
    })))
}

/// POST /api/auth/:provider/disconnect
/// Removes stored tokens and the linked identity; repeated calls succeed
pub async fn disconnect_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    body: Option<Json<UserTarget>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let state = state_lock.read().await.clone();
    let kind = parse_provider(&provider)?;
    let user_id = authed.target(body.and_then(|Json(t)| t.user_id))?;

    state.oauth_service.disconnect(kind, user_id).await?;

    Ok(Json(serde_json::json!({
        "message": "Disconnected",
        "provider": kind,
        "connected": false,
    })))
}

/// GET /api/auth/:provider/status[?userId=<id>]
pub async fn status_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
    authed: AuthedUser,
    Path(provider): Path<String>,
    Query(target): Query<UserTarget>,
) -> Result<Json<ConnectionStatus>, ApiError> {
    let state = state_lock.read().await.clone();
    let kind = parse_provider(&provider)?;
    let user_id = authed.target(target.user_id)?;

    let status = state.oauth_service.connection_status(kind, user_id).await?;

    debug!(
        user_id = %user_id,
        provider = %kind,
        connected = status.connected,
        profile_pending = status.profile_pending,
        "Connection status read"
    );
    Ok(Json(status))
}
