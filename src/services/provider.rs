// src/services/provider.rs
//! HTTP client for provider token and "current user" endpoints

use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::oauth::models::{
    ClientAuthMethod, ProviderConfig, ProviderIdentity, ProviderKind, TokenResponse,
};

const USER_AGENT: &str = concat!("growth-api/", env!("CARGO_PKG_VERSION"));

/// Longest `expires_in` accepted from a token endpoint (ten years)
pub const MAX_TOKEN_LIFETIME_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("Provider rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Unexpected provider response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Failures worth retrying: network trouble, rate limiting, provider outages
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Rejected { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            ProviderError::Malformed(_) => false,
        }
    }
}

#[derive(Clone)]
pub struct ProviderClient {
    client: Client,
}

impl ProviderClient {
    pub fn new(timeout_seconds: u64) -> Self {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_else(|e| {
                warn!(
                    error = %e,
                    "Failed to build provider HTTP client; falling back to defaults without timeout"
                );
                Client::new()
            });

        Self { client }
    }

    /// authorization_code grant, proving possession with the PKCE verifier
    pub async fn exchange_code(
        &self,
        provider: &ProviderConfig,
        code: &str,
        verifier: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", provider.redirect_uri.as_str()),
            ("code_verifier", verifier),
        ];

        debug!(provider = %provider.kind, "Exchanging authorization code");
        self.token_request(provider, params).await
    }

    /// refresh_token grant
    pub async fn refresh_token(
        &self,
        provider: &ProviderConfig,
        refresh_token: &str,
    ) -> Result<TokenResponse, ProviderError> {
        let params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        debug!(provider = %provider.kind, "Refreshing access token");
        self.token_request(provider, params).await
    }

    async fn token_request(
        &self,
        provider: &ProviderConfig,
        mut params: Vec<(&str, &str)>,
    ) -> Result<TokenResponse, ProviderError> {
        params.push(("client_id", provider.client_id.as_str()));

        let mut request = self.client.post(&provider.token_url);
        match (provider.client_auth, provider.client_secret.as_deref()) {
            (ClientAuthMethod::Basic, Some(secret)) => {
                request = request.basic_auth(&provider.client_id, Some(secret));
            }
            (ClientAuthMethod::Body, Some(secret)) => {
                params.push(("client_secret", secret));
            }
            // public client
            (_, None) => {}
        }

        let response = request.form(&params).send().await.map_err(|e| {
            error!(provider = %provider.kind, error = %e, "Failed to reach token endpoint");
            ProviderError::Transport(e.to_string())
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!(
                provider = %provider.kind,
                status = %status,
                "Token endpoint rejected the request"
            );
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| ProviderError::Malformed(format!("token response: {}", e)))?;

        // GitHub reports grant errors with HTTP 200 and an `error` field
        if value.get("error").is_some() && value.get("access_token").is_none() {
            warn!(provider = %provider.kind, "Token endpoint returned an error payload");
            return Err(ProviderError::Rejected {
                status: StatusCode::BAD_REQUEST.as_u16(),
                body: truncate(&body),
            });
        }

        let tokens = serde_json::from_value::<TokenResponse>(value)
            .map_err(|e| ProviderError::Malformed(format!("token response: {}", e)))?;

        if let Some(secs) = tokens.expires_in {
            if !(1..=MAX_TOKEN_LIFETIME_SECONDS).contains(&secs) {
                warn!(
                    provider = %provider.kind,
                    expires_in = secs,
                    "Token endpoint returned an out-of-range lifetime"
                );
                return Err(ProviderError::Malformed(format!(
                    "token response: expires_in out of range: {}",
                    secs
                )));
            }
        }

        Ok(tokens)
    }

    /// Fetch and normalise the provider's "current user" document
    pub async fn fetch_identity(
        &self,
        provider: &ProviderConfig,
        access_token: &str,
    ) -> Result<ProviderIdentity, ProviderError> {
        let response = self
            .client
            .get(&provider.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
                body: truncate(&body),
            });
        }

        let value = response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Malformed(format!("identity response: {}", e)))?;

        parse_identity(provider.kind, value)
    }
}

#[derive(Deserialize)]
struct TwitterEnvelope {
    data: TwitterUser,
}

#[derive(Deserialize)]
struct TwitterUser {
    id: String,
    username: String,
    name: Option<String>,
    profile_image_url: Option<String>,
}

#[derive(Deserialize)]
struct GoogleUser {
    sub: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
    email: Option<String>,
}

pub(crate) fn parse_identity(
    kind: ProviderKind,
    value: Value,
) -> Result<ProviderIdentity, ProviderError> {
    let malformed =
        |e: serde_json::Error| ProviderError::Malformed(format!("{} user: {}", kind, e));

    let identity = match kind {
        ProviderKind::Twitter => {
            let user = serde_json::from_value::<TwitterEnvelope>(value)
                .map_err(malformed)?
                .data;
            ProviderIdentity {
                provider_id: user.id,
                username: user.username,
                display_name: user.name,
                avatar_url: user.profile_image_url,
                email: None,
            }
        }
        ProviderKind::Google => {
            let user = serde_json::from_value::<GoogleUser>(value).map_err(malformed)?;
            // Google has no handle; fall back to the mailbox name
            let username = user
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| user.sub.clone());
            ProviderIdentity {
                provider_id: user.sub,
                username,
                display_name: user.name,
                avatar_url: user.picture,
                email: user.email,
            }
        }
        ProviderKind::Github => {
            let user = serde_json::from_value::<GithubUser>(value).map_err(malformed)?;
            ProviderIdentity {
                provider_id: user.id.to_string(),
                username: user.login,
                display_name: user.name,
                avatar_url: user.avatar_url,
                email: user.email,
            }
        }
    };

    if identity.provider_id.is_empty() {
        return Err(ProviderError::Malformed(format!(
            "{} user without an id",
            kind
        )));
    }

    Ok(identity)
}

fn truncate(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}
