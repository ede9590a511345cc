// src/main.rs
use anyhow::Context;
use dotenv::dotenv;
use std::path::PathBuf;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// MODULE IMPORTS
// ============================================================================

mod app;
mod auth;
mod common;
mod logging_middleware;
mod oauth;
mod services;
mod storage;

// ============================================================================
// COMMON IMPORTS
// ============================================================================

use auth::SessionIssuer;
use common::{AppConfig, AppState};
use oauth::models::ProviderKind;
use oauth::OAuthService;
use services::{EncryptionService, ProviderClient};
use storage::{MemoryStorage, SqliteStorage, Storage};

const PURGE_INTERVAL_SECONDS: u64 = 60;

// ============================================================================
// MAIN APPLICATION ENTRY POINT
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // ========================================================================
    // ENVIRONMENT CONFIGURATION
    // ========================================================================

    let config = AppConfig::from_env().context("invalid configuration")?;
    info!(
        providers = ?config.providers.iter().map(|p| p.kind.as_str()).collect::<Vec<_>>(),
        "Configuration loaded"
    );
    if config
        .provider(ProviderKind::Twitter)
        .map_or(false, |p| p.client_secret.is_none())
    {
        info!("TWITTER_CLIENT_SECRET not set; exchanging codes as a public client");
    }

    let encryption = match config.token_encryption_key.as_deref() {
        Some(key) => Some(Arc::new(
            EncryptionService::from_key(key).context("invalid TOKEN_ENCRYPTION_KEY")?,
        )),
        None => {
            warn!("TOKEN_ENCRYPTION_KEY not set; provider tokens are stored unencrypted");
            None
        }
    };

    // ========================================================================
    // STORAGE SETUP
    // ========================================================================

    let storage: Arc<dyn Storage> = match config.database_url.as_deref() {
        Some(url) => {
            ensure_sqlite_parent_dir(url).await?;
            Arc::new(SqliteStorage::connect(url, encryption).await?)
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory storage, state is lost on restart");
            Arc::new(MemoryStorage::new())
        }
    };

    if let Some(bootstrap) = config.admin_bootstrap.as_ref() {
        auth::handlers::ensure_admin(storage.as_ref(), bootstrap).await?;
    }

    // ========================================================================
    // SERVICE INITIALIZATION
    // ========================================================================

    let sessions = Arc::new(SessionIssuer::new(
        &config.jwt_secret,
        config.jwt_expiry_hours,
    ));

    let oauth_service = Arc::new(OAuthService::new(
        storage.clone(),
        ProviderClient::new(config.provider_timeout_seconds),
        config.providers.clone(),
        config.challenge_ttl_seconds,
    ));
    info!("OAuthService initialized");

    spawn_purge_task(oauth_service.clone());

    // ========================================================================
    // APPLICATION STATE
    // ========================================================================

    let port = config.port;
    let app_state = AppState {
        storage,
        config: Arc::new(config),
        sessions,
        oauth_service,
    };

    let app = app::build_app(app_state);

    // ========================================================================
    // SERVER STARTUP
    // ========================================================================

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Periodically drop pending challenges and handoff codes past their lifetime
fn spawn_purge_task(oauth_service: Arc<OAuthService>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(PURGE_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            if let Err(e) = oauth_service.purge_expired().await {
                warn!(error = %e, "Failed to purge expired authorization state");
            }
        }
    });
}

async fn ensure_sqlite_parent_dir(database_url: &str) -> anyhow::Result<()> {
    if let Some(path_part) = database_url.strip_prefix("sqlite://") {
        let path_without_params = path_part.split('?').next().unwrap_or("");
        if !path_without_params.is_empty() && !path_without_params.starts_with(':') {
            let db_path = PathBuf::from(path_without_params);
            if let Some(parent) = db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    tokio::fs::create_dir_all(parent).await?;
                }
            }
        }
    }
    Ok(())
}
