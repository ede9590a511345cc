//! OAuth data models: provider registry, pending challenges, token records
//! and linked provider identities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Twitter,
    Google,
    Github,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Twitter => "twitter",
            ProviderKind::Google => "google",
            ProviderKind::Github => "github",
        }
    }

    /// Prefix of this provider's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::Twitter => "TWITTER",
            ProviderKind::Google => "GOOGLE",
            ProviderKind::Github => "GITHUB",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "twitter" | "x" => Ok(ProviderKind::Twitter),
            "google" => Ok(ProviderKind::Google),
            "github" => Ok(ProviderKind::Github),
            other => Err(other.to_string()),
        }
    }
}

/// What a completed flow does with the provider account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowPurpose {
    /// Attach the provider account and its tokens to an existing local user
    Link,
    /// Sign in (or sign up) a local user from the provider identity
    SignIn,
}

/// How the client authenticates to the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuthMethod {
    /// HTTP Basic with client id and secret; public clients fall back to the form body
    Basic,
    /// `client_id` / `client_secret` form fields
    Body,
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub purpose: FlowPurpose,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub client_auth: ClientAuthMethod,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    /// Whether a refresh token stays valid after use when the provider does not rotate it
    pub refresh_token_reusable: bool,
}

impl ProviderConfig {
    /// Public endpoints and scopes for each provider
    pub fn defaults(
        kind: ProviderKind,
        client_id: String,
        client_secret: Option<String>,
        redirect_uri: String,
    ) -> Self {
        let scopes = |s: &[&str]| s.iter().map(|v| v.to_string()).collect::<Vec<_>>();

        match kind {
            ProviderKind::Twitter => Self {
                kind,
                purpose: FlowPurpose::Link,
                client_id,
                client_secret,
                client_auth: ClientAuthMethod::Basic,
                authorize_url: "https://twitter.com/i/oauth2/authorize".to_string(),
                token_url: "https://api.twitter.com/2/oauth2/token".to_string(),
                userinfo_url:
                    "https://api.twitter.com/2/users/me?user.fields=id,name,username,profile_image_url"
                        .to_string(),
                redirect_uri,
                scopes: scopes(&[
                    "tweet.read",
                    "tweet.write",
                    "users.read",
                    "follows.read",
                    "follows.write",
                    "offline.access",
                ]),
                refresh_token_reusable: false,
            },
            ProviderKind::Google => Self {
                kind,
                purpose: FlowPurpose::SignIn,
                client_id,
                client_secret,
                client_auth: ClientAuthMethod::Body,
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_url: "https://oauth2.googleapis.com/token".to_string(),
                userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
                redirect_uri,
                scopes: scopes(&["openid", "email", "profile"]),
                refresh_token_reusable: true,
            },
            ProviderKind::Github => Self {
                kind,
                purpose: FlowPurpose::SignIn,
                client_id,
                client_secret,
                client_auth: ClientAuthMethod::Body,
                authorize_url: "https://github.com/login/oauth/authorize".to_string(),
                token_url: "https://github.com/login/oauth/access_token".to_string(),
                userinfo_url: "https://api.github.com/user".to_string(),
                redirect_uri,
                scopes: scopes(&["read:user", "user:email"]),
                refresh_token_reusable: true,
            },
        }
    }
}

/// Pending authorization, keyed by the random state value
#[derive(Debug, Clone, PartialEq)]
pub struct PkceChallenge {
    pub state: String,
    pub provider: ProviderKind,
    /// Initiating local user; `None` for sign-in flows
    pub user_id: Option<i64>,
    pub verifier: String,
    pub created_at: DateTime<Utc>,
}

/// Provider tokens held on behalf of one user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub user_id: i64,
    pub provider: ProviderKind,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    /// `None` when the provider did not state a lifetime
    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// True when the access token is expired or expires within `skew_seconds`
    pub fn expires_within(&self, skew_seconds: i64, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => expires_at <= now + chrono::Duration::seconds(skew_seconds),
            None => false,
        }
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_deref().map_or(false, |t| !t.is_empty())
    }
}

/// Provider account linked to a local user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedIdentity {
    pub user_id: i64,
    pub provider: ProviderKind,
    pub provider_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
    pub linked_at: DateTime<Utc>,
}

/// Normalised "current user" payload from a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderIdentity {
    pub provider_id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub email: Option<String>,
}

impl ProviderIdentity {
    pub fn into_link(self, user_id: i64, provider: ProviderKind) -> LinkedIdentity {
        LinkedIdentity {
            user_id,
            provider,
            provider_id: self.provider_id,
            username: self.username,
            display_name: self.display_name,
            avatar_url: self.avatar_url,
            email: self.email,
            linked_at: Utc::now(),
        }
    }
}

/// Token endpoint response (authorization_code and refresh_token grants)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// Query parameters of the provider redirect
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Query parameters of the authorization start endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartParams {
    pub user_id: Option<String>,
}

/// Body of refresh / disconnect requests
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTarget {
    pub user_id: Option<i64>,
}

/// Authorization redirect produced by `begin_authorization`
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub state: String,
}

/// Consumer-facing view of one provider connection
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub provider: ProviderKind,
    pub connected: bool,
    pub profile_pending: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub profile: Option<LinkedIdentity>,
}
