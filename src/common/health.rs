//! Liveness endpoint reporting the active storage backend

use axum::extract::{Extension, Json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use super::AppState;

/// GET /api/health
///
/// # Response
/// ```json
/// { "status": "ok", "storage": "sqlite", "storage_ok": true }
/// ```
pub async fn health_handler(
    Extension(state_lock): Extension<Arc<RwLock<AppState>>>,
) -> Json<serde_json::Value> {
    let state = state_lock.read().await.clone();

    let storage_ok = match state.storage.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Storage ping failed");
            false
        }
    };

    Json(serde_json::json!({
        "status": if storage_ok { "ok" } else { "degraded" },
        "storage": state.storage.backend_name(),
        "storage_ok": storage_ok,
    }))
}
