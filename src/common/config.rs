// src/common/config.rs
//! Process configuration loaded from the environment at startup.
//!
//! Required secrets have no fallback values: a missing `JWT_SECRET` or
//! Twitter client setting is a fatal [`ConfigError`] before the server binds.

use std::env;
use thiserror::Error;

use crate::oauth::models::{ProviderConfig, ProviderKind};

const MIN_JWT_SECRET_LEN: usize = 32;
const MAX_JWT_EXPIRY_HOURS: i64 = 24 * 365;
const MAX_CHALLENGE_TTL_SECONDS: i64 = 24 * 60 * 60;
const MAX_PROVIDER_TIMEOUT_SECONDS: i64 = 300;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Credentials for seeding an admin account on startup
#[derive(Debug, Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: Option<String>,
    pub cors_origins: Vec<String>,
    pub frontend_url: String,
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,
    pub challenge_ttl_seconds: i64,
    pub provider_timeout_seconds: u64,
    pub token_encryption_key: Option<String>,
    pub admin_bootstrap: Option<AdminBootstrap>,
    pub providers: Vec<ProviderConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    /// Empty values are treated the same as unset ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: format!("must be at least {} bytes", MIN_JWT_SECRET_LEN),
            });
        }

        let jwt_expiry_hours = parse_bounded(
            get("JWT_EXPIRY_HOURS"),
            "JWT_EXPIRY_HOURS",
            24,
            MAX_JWT_EXPIRY_HOURS,
        )?;
        let challenge_ttl_seconds = parse_bounded(
            get("PKCE_CHALLENGE_TTL_SECONDS"),
            "PKCE_CHALLENGE_TTL_SECONDS",
            600,
            MAX_CHALLENGE_TTL_SECONDS,
        )?;
        let provider_timeout_seconds = parse_bounded(
            get("PROVIDER_TIMEOUT_SECONDS"),
            "PROVIDER_TIMEOUT_SECONDS",
            10,
            MAX_PROVIDER_TIMEOUT_SECONDS,
        )? as u64;

        let port = match get("PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "PORT",
                reason: e.to_string(),
            })?,
            None => 5000,
        };

        let cors_origins = get("CORS_ORIGINS")
            .unwrap_or_else(|| "http://localhost:5000,http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let frontend_url = get("FRONTEND_URL")
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_default();

        let admin_bootstrap = match (get("ADMIN_USERNAME"), get("ADMIN_PASSWORD")) {
            (Some(username), Some(password)) => Some(AdminBootstrap { username, password }),
            (Some(_), None) => return Err(ConfigError::Missing("ADMIN_PASSWORD")),
            _ => None,
        };

        let mut providers = vec![twitter_provider(&get)?];
        for kind in [ProviderKind::Google, ProviderKind::Github] {
            if let Some(provider) = sign_in_provider(kind, &get) {
                providers.push(provider);
            }
        }

        Ok(Self {
            port,
            database_url: get("DATABASE_URL"),
            cors_origins,
            frontend_url,
            jwt_secret,
            jwt_expiry_hours,
            challenge_ttl_seconds,
            provider_timeout_seconds,
            token_encryption_key: get("TOKEN_ENCRYPTION_KEY"),
            admin_bootstrap,
            providers,
        })
    }

    pub fn provider(&self, kind: ProviderKind) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.kind == kind)
    }
}

/// Parse a duration setting that must lie in `1..=max`
fn parse_bounded(
    raw: Option<String>,
    key: &'static str,
    default: i64,
    max: i64,
) -> Result<i64, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => match value.parse::<i64>() {
            Ok(n) if n > max => Err(ConfigError::Invalid {
                key,
                reason: format!("must be at most {}", max),
            }),
            Ok(n) if n > 0 => Ok(n),
            Ok(_) => Err(ConfigError::Invalid {
                key,
                reason: "must be greater than zero".to_string(),
            }),
            Err(e) => Err(ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        },
    }
}

fn twitter_provider<G>(get: &G) -> Result<ProviderConfig, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let client_id = get("TWITTER_CLIENT_ID").ok_or(ConfigError::Missing("TWITTER_CLIENT_ID"))?;
    let redirect_uri =
        get("TWITTER_REDIRECT_URI").ok_or(ConfigError::Missing("TWITTER_REDIRECT_URI"))?;
    validate_redirect_uri("TWITTER_REDIRECT_URI", &redirect_uri)?;

    let mut provider = ProviderConfig::defaults(
        ProviderKind::Twitter,
        client_id,
        get("TWITTER_CLIENT_SECRET"),
        redirect_uri,
    );
    apply_endpoint_overrides(&mut provider, get);
    Ok(provider)
}

/// Google and GitHub are only enabled when id, secret and redirect URI are all present
fn sign_in_provider<G>(kind: ProviderKind, get: &G) -> Option<ProviderConfig>
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = kind.env_prefix();
    let client_id = get(&format!("{}_CLIENT_ID", prefix))?;
    let client_secret = get(&format!("{}_CLIENT_SECRET", prefix))?;
    let redirect_uri = get(&format!("{}_REDIRECT_URI", prefix))?;

    let mut provider = ProviderConfig::defaults(kind, client_id, Some(client_secret), redirect_uri);
    apply_endpoint_overrides(&mut provider, get);
    Some(provider)
}

fn apply_endpoint_overrides<G>(provider: &mut ProviderConfig, get: &G)
where
    G: Fn(&str) -> Option<String>,
{
    let prefix = provider.kind.env_prefix();
    if let Some(url) = get(&format!("{}_AUTHORIZE_URL", prefix)) {
        provider.authorize_url = url;
    }
    if let Some(url) = get(&format!("{}_TOKEN_URL", prefix)) {
        provider.token_url = url;
    }
    if let Some(url) = get(&format!("{}_USERINFO_URL", prefix)) {
        provider.userinfo_url = url;
    }
}

fn validate_redirect_uri(key: &'static str, uri: &str) -> Result<(), ConfigError> {
    if uri.starts_with("https://") || uri.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key,
            reason: "must be an absolute http(s) URL".to_string(),
        })
    }
}
