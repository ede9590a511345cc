//! Authorization Code + PKCE flow: initiation, callback exchange, refresh
//! and the consumer-facing connection view.
//!
//! A flow instance moves STARTED -> AWAITING_CALLBACK -> EXCHANGING ->
//! FETCHING_IDENTITY -> LINKED. A failed identity fetch after a successful
//! exchange leaves the connection in the recoverable "profile pending"
//! state; the next status read retries it with the stored token.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{
    AuthorizationRequest, CallbackParams, ConnectionStatus, FlowPurpose, LinkedIdentity,
    PkceChallenge, ProviderConfig, ProviderIdentity, ProviderKind, TokenRecord, TokenResponse,
};
use super::pkce;
use crate::auth::models::{LoginHandoff, NewUser, Role};
use crate::auth::password;
use crate::common::id_generator::{generate_raw_id, generate_url_token, TOKEN_BYTES};
use crate::common::safe_token_log;
use crate::services::provider::{ProviderClient, ProviderError};
use crate::storage::{Storage, StorageError};

/// Attempts for the identity fetch when the provider fails transiently
const IDENTITY_FETCH_ATTEMPTS: u32 = 3;
const IDENTITY_RETRY_BASE_MS: u64 = 200;

/// Access tokens expiring within this window are refreshed before use
pub const ACCESS_TOKEN_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid callback: {0}")]
    InvalidCallback(String),

    #[error("unknown or disabled provider: {0}")]
    UnknownProvider(String),

    #[error("authorization state is unknown, already used or expired")]
    InvalidState,

    #[error("authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("{provider} token exchange failed: {source}")]
    TokenExchangeFailed {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("no refresh token stored")]
    NoRefreshToken,

    #[error("{provider} token refresh failed: {source}")]
    RefreshFailed {
        provider: ProviderKind,
        #[source]
        source: ProviderError,
    },

    #[error("identity fetch failed: {0}")]
    IdentityFetchFailed(String),

    #[error("provider account is linked to another user")]
    IdentityConflict,

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Terminal result of a successful callback
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    /// Tokens stored and identity linked to the initiating user
    Linked {
        user_id: i64,
        identity: LinkedIdentity,
    },
    /// Tokens stored; the profile will be fetched again on the next status read
    ProfilePending { user_id: i64 },
    /// Social sign-in finished; `handoff` is redeemed by the client for a session
    SignedIn {
        user_id: i64,
        handoff: String,
        created: bool,
    },
}

pub struct OAuthService {
    storage: Arc<dyn Storage>,
    client: ProviderClient,
    providers: Vec<ProviderConfig>,
    challenge_ttl: Duration,
    // serialises refreshes per (user, provider) so a rotated token is never used twice
    refresh_locks: RefreshLocks,
}

impl OAuthService {
    pub fn new(
        storage: Arc<dyn Storage>,
        client: ProviderClient,
        providers: Vec<ProviderConfig>,
        challenge_ttl_seconds: i64,
    ) -> Self {
        Self {
            storage,
            client,
            providers,
            challenge_ttl: Duration::seconds(challenge_ttl_seconds),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn provider(&self, kind: ProviderKind) -> Result<&ProviderConfig, FlowError> {
        self.providers
            .iter()
            .find(|p| p.kind == kind)
            .ok_or_else(|| FlowError::UnknownProvider(kind.to_string()))
    }

    /// Create a pending challenge and the provider authorization URL.
    ///
    /// Link providers require an existing `user_id`; sign-in providers ignore it.
    /// A new start supersedes any pending challenge of the same user and provider.
    pub async fn begin_authorization(
        &self,
        kind: ProviderKind,
        user_id: Option<i64>,
    ) -> Result<AuthorizationRequest, FlowError> {
        let provider = self.provider(kind)?;

        let user_id = match provider.purpose {
            FlowPurpose::Link => {
                let id = user_id
                    .ok_or_else(|| FlowError::InvalidRequest("userId is required".to_string()))?;
                if self.storage.get_user(id).await?.is_none() {
                    return Err(FlowError::InvalidRequest(format!("unknown user {}", id)));
                }
                Some(id)
            }
            FlowPurpose::SignIn => None,
        };

        let verifier = pkce::generate_verifier();
        let state = pkce::generate_state();
        let challenge = pkce::challenge_s256(&verifier);

        self.storage
            .put_challenge(&PkceChallenge {
                state: state.clone(),
                provider: kind,
                user_id,
                verifier,
                created_at: Utc::now(),
            })
            .await?;

        let separator = if provider.authorize_url.contains('?') { '&' } else { '?' };
        let url = format!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method={}",
            provider.authorize_url,
            separator,
            urlencoding::encode(&provider.client_id),
            urlencoding::encode(&provider.redirect_uri),
            urlencoding::encode(&provider.scopes.join(" ")),
            urlencoding::encode(&state),
            urlencoding::encode(&challenge),
            pkce::METHOD,
        );

        info!(
            provider = %kind,
            user_id = ?user_id,
            state = %safe_token_log(&state),
            "Authorization started"
        );

        Ok(AuthorizationRequest { url, state })
    }

    /// Validate the callback, exchange the code and link the provider account
    pub async fn handle_callback(
        &self,
        kind: ProviderKind,
        params: CallbackParams,
    ) -> Result<CallbackOutcome, FlowError> {
        let provider = self.provider(kind)?;

        if let Some(error) = params.error {
            // the user declined; the pending challenge is useless now
            if let Some(state) = params.state.as_deref() {
                self.storage.take_challenge(state).await?;
            }
            warn!(
                provider = %kind,
                error = %error,
                description = ?params.error_description,
                "Provider returned an authorization error"
            );
            return Err(FlowError::AuthorizationDenied(error));
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| FlowError::InvalidCallback("missing code".to_string()))?;
        let state = params
            .state
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FlowError::InvalidCallback("missing state".to_string()))?;

        // Consumed before any network call: a state can never be replayed
        let challenge = self
            .storage
            .take_challenge(&state)
            .await?
            .ok_or_else(|| {
                warn!(provider = %kind, state = %safe_token_log(&state), "Unknown or replayed state");
                FlowError::InvalidState
            })?;

        if challenge.provider != kind {
            warn!(provider = %kind, "State was issued for another provider");
            return Err(FlowError::InvalidState);
        }
        if self.is_expired(challenge.created_at) {
            warn!(provider = %kind, "Authorization state expired");
            return Err(FlowError::InvalidState);
        }

        let tokens = self
            .client
            .exchange_code(provider, &code, &challenge.verifier)
            .await
            .map_err(|source| {
                warn!(provider = %kind, error = %source, "Authorization code exchange failed");
                FlowError::TokenExchangeFailed {
                    provider: kind,
                    source,
                }
            })?;

        match provider.purpose {
            FlowPurpose::Link => {
                let user_id = challenge.user_id.ok_or(FlowError::InvalidState)?;
                self.complete_link(provider, user_id, tokens).await
            }
            FlowPurpose::SignIn => self.complete_sign_in(provider, tokens).await,
        }
    }

    async fn complete_link(
        &self,
        provider: &ProviderConfig,
        user_id: i64,
        tokens: TokenResponse,
    ) -> Result<CallbackOutcome, FlowError> {
        let kind = provider.kind;
        let previous = self.storage.get_tokens(user_id, kind).await?;
        let record = token_record(user_id, kind, tokens, None);
        self.storage.save_tokens(&record).await?;

        let identity = match self.fetch_identity(provider, &record.access_token).await {
            Ok(identity) => identity,
            Err(e) => {
                warn!(
                    user_id = %user_id,
                    provider = %kind,
                    error = %e,
                    "Token saved but profile fetch failed; connection is profile pending"
                );
                return Ok(CallbackOutcome::ProfilePending { user_id });
            }
        };

        let link = identity.into_link(user_id, kind);
        match self.storage.upsert_identity(&link).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                self.restore_tokens(user_id, kind, previous).await?;
                warn!(
                    user_id = %user_id,
                    provider = %kind,
                    provider_id = %link.provider_id,
                    "Provider account already linked to another user"
                );
                return Err(FlowError::IdentityConflict);
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            user_id = %user_id,
            provider = %kind,
            username = %link.username,
            "Provider account linked"
        );
        Ok(CallbackOutcome::Linked {
            user_id,
            identity: link,
        })
    }

    async fn complete_sign_in(
        &self,
        provider: &ProviderConfig,
        tokens: TokenResponse,
    ) -> Result<CallbackOutcome, FlowError> {
        let kind = provider.kind;
        // Without an identity there is no user to sign in
        let identity = self
            .fetch_identity(provider, &tokens.access_token)
            .await
            .map_err(|e| FlowError::IdentityFetchFailed(e.to_string()))?;

        let (user_id, created) = self.resolve_sign_in_user(kind, &identity).await?;

        let previous = self.storage.get_tokens(user_id, kind).await?;
        self.storage
            .save_tokens(&token_record(user_id, kind, tokens, None))
            .await?;

        let link = identity.into_link(user_id, kind);
        match self.storage.upsert_identity(&link).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                self.restore_tokens(user_id, kind, previous).await?;
                return Err(FlowError::IdentityConflict);
            }
            Err(e) => return Err(e.into()),
        }

        self.storage
            .fill_profile(user_id, link.display_name.as_deref(), link.avatar_url.as_deref())
            .await?;

        let handoff = self.create_handoff(user_id).await?;

        info!(
            user_id = %user_id,
            provider = %kind,
            created = created,
            "Social sign-in completed"
        );
        Ok(CallbackOutcome::SignedIn {
            user_id,
            handoff,
            created,
        })
    }

    /// Linked subject first, then a user with the same email, otherwise a new account
    async fn resolve_sign_in_user(
        &self,
        kind: ProviderKind,
        identity: &ProviderIdentity,
    ) -> Result<(i64, bool), FlowError> {
        if let Some(link) = self
            .storage
            .find_identity(kind, &identity.provider_id)
            .await?
        {
            return Ok((link.user_id, false));
        }

        if let Some(email) = identity.email.as_deref() {
            if let Some(user) = self.storage.get_user_by_email(email).await? {
                debug!(user_id = %user.id, provider = %kind, "Matched sign-in by email");
                return Ok((user.id, false));
            }
        }

        // Random password: the account can only be entered through the provider
        let password_hash = password::hash_password_blocking(generate_url_token(TOKEN_BYTES))
            .await
            .map_err(|e| FlowError::Internal(e.to_string()))?;

        let base = sanitize_username(&identity.username, kind);
        let mut candidate = base.clone();
        for _ in 0..5 {
            let new_user = NewUser {
                username: candidate.clone(),
                password_hash: password_hash.clone(),
                email: identity.email.clone(),
                display_name: identity.display_name.clone(),
                profile_image: identity.avatar_url.clone(),
                role: Role::Free,
            };
            match self.storage.create_user(new_user).await {
                Ok(user) => {
                    info!(user_id = %user.id, provider = %kind, "Created user from social sign-in");
                    return Ok((user.id, true));
                }
                Err(StorageError::Conflict(_)) => {
                    candidate = format!("{}_{}", base, generate_raw_id(4).to_lowercase());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FlowError::Storage(StorageError::Conflict(format!(
            "could not allocate a username for {}",
            base
        ))))
    }

    async fn restore_tokens(
        &self,
        user_id: i64,
        kind: ProviderKind,
        previous: Option<TokenRecord>,
    ) -> Result<(), StorageError> {
        match previous {
            Some(record) => self.storage.save_tokens(&record).await,
            None => self.storage.delete_tokens(user_id, kind).await.map(|_| ()),
        }
    }

    async fn fetch_identity(
        &self,
        provider: &ProviderConfig,
        access_token: &str,
    ) -> Result<ProviderIdentity, ProviderError> {
        let mut attempt = 1;
        loop {
            match self.client.fetch_identity(provider, access_token).await {
                Ok(identity) => return Ok(identity),
                Err(e) if e.is_transient() && attempt < IDENTITY_FETCH_ATTEMPTS => {
                    debug!(
                        provider = %provider.kind,
                        attempt = attempt,
                        error = %e,
                        "Transient identity fetch failure, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        IDENTITY_RETRY_BASE_MS * u64::from(attempt),
                    ))
                    .await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Exchange the stored refresh token for a new token pair
    pub async fn refresh(
        &self,
        kind: ProviderKind,
        user_id: i64,
    ) -> Result<TokenRecord, FlowError> {
        let provider = self.provider(kind)?;

        let slot = self.refresh_slot(user_id, kind);
        let _guard = slot.lock.lock().await;

        let current = self
            .storage
            .get_tokens(user_id, kind)
            .await?
            .filter(TokenRecord::has_refresh_token)
            .ok_or(FlowError::NoRefreshToken)?;
        let refresh_token = current.refresh_token.clone().unwrap_or_default();

        let tokens = self
            .client
            .refresh_token(provider, &refresh_token)
            .await
            .map_err(|source| {
                warn!(
                    user_id = %user_id,
                    provider = %kind,
                    error = %source,
                    "Token refresh failed; reauthorization required"
                );
                FlowError::RefreshFailed {
                    provider: kind,
                    source,
                }
            })?;

        let retained = provider
            .refresh_token_reusable
            .then_some(refresh_token);
        let record = token_record(user_id, kind, tokens, retained);
        self.storage.save_tokens(&record).await?;

        info!(
            user_id = %user_id,
            provider = %kind,
            rotated = record.refresh_token.as_deref() != current.refresh_token.as_deref(),
            "Access token refreshed"
        );
        Ok(record)
    }

    /// A usable access token, refreshed first when it is about to expire
    pub async fn access_token(
        &self,
        kind: ProviderKind,
        user_id: i64,
    ) -> Result<Option<String>, FlowError> {
        let Some(record) = self.storage.get_tokens(user_id, kind).await? else {
            return Ok(None);
        };

        if !record.expires_within(ACCESS_TOKEN_SKEW_SECONDS, Utc::now()) {
            return Ok(Some(record.access_token));
        }
        if !record.has_refresh_token() {
            return Err(FlowError::NoRefreshToken);
        }
        Ok(Some(self.refresh(kind, user_id).await?.access_token))
    }

    /// Connected flag and profile; retries a pending profile fetch
    pub async fn connection_status(
        &self,
        kind: ProviderKind,
        user_id: i64,
    ) -> Result<ConnectionStatus, FlowError> {
        let provider = self.provider(kind)?;

        let Some(record) = self.storage.get_tokens(user_id, kind).await? else {
            return Ok(ConnectionStatus {
                provider: kind,
                connected: false,
                profile_pending: false,
                expires_at: None,
                profile: None,
            });
        };

        let mut expires_at = record.expires_at;
        let mut profile = self.storage.get_identity(user_id, kind).await?;

        if profile.is_none() {
            match self.recover_profile(provider, user_id).await {
                Ok((identity, refreshed_expiry)) => {
                    expires_at = refreshed_expiry;
                    profile = Some(identity);
                }
                Err(FlowError::IdentityConflict) => return Err(FlowError::IdentityConflict),
                Err(FlowError::Storage(e)) => return Err(FlowError::Storage(e)),
                Err(e) => {
                    debug!(user_id = %user_id, provider = %kind, error = %e, "Profile still pending");
                }
            }
        }

        Ok(ConnectionStatus {
            provider: kind,
            connected: true,
            profile_pending: profile.is_none(),
            expires_at,
            profile,
        })
    }

    async fn recover_profile(
        &self,
        provider: &ProviderConfig,
        user_id: i64,
    ) -> Result<(LinkedIdentity, Option<DateTime<Utc>>), FlowError> {
        let kind = provider.kind;
        let access_token = self
            .access_token(kind, user_id)
            .await?
            .ok_or(FlowError::NoRefreshToken)?;

        let identity = self
            .fetch_identity(provider, &access_token)
            .await
            .map_err(|e| FlowError::IdentityFetchFailed(e.to_string()))?;

        let link = identity.into_link(user_id, kind);
        match self.storage.upsert_identity(&link).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                // the tokens belong to an account owned by someone else
                self.storage.delete_tokens(user_id, kind).await?;
                return Err(FlowError::IdentityConflict);
            }
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %user_id, provider = %kind, "Pending profile linked");
        let expires_at = self
            .storage
            .get_tokens(user_id, kind)
            .await?
            .and_then(|r| r.expires_at);
        Ok((link, expires_at))
    }

    /// Remove tokens and identity link; calling it again is a no-op
    pub async fn disconnect(&self, kind: ProviderKind, user_id: i64) -> Result<(), FlowError> {
        self.storage.disconnect(user_id, kind).await?;
        info!(user_id = %user_id, provider = %kind, "Provider disconnected");
        Ok(())
    }

    /// Single-use code the client exchanges for a session after sign-in
    pub async fn create_handoff(&self, user_id: i64) -> Result<String, FlowError> {
        let code = generate_url_token(TOKEN_BYTES);
        self.storage
            .put_handoff(&LoginHandoff {
                code: code.clone(),
                user_id,
                created_at: Utc::now(),
            })
            .await?;
        Ok(code)
    }

    /// Consume a handoff code, returning its user id
    pub async fn redeem_handoff(&self, code: &str) -> Result<i64, FlowError> {
        let handoff = self
            .storage
            .take_handoff(code)
            .await?
            .ok_or(FlowError::InvalidState)?;

        if self.is_expired(handoff.created_at) {
            return Err(FlowError::InvalidState);
        }
        Ok(handoff.user_id)
    }

    /// Drop expired challenges and handoff codes; returns how many were removed
    pub async fn purge_expired(&self) -> Result<u64, FlowError> {
        let cutoff = Utc::now() - self.challenge_ttl;
        let challenges = self.storage.purge_challenges(cutoff).await?;
        let handoffs = self.storage.purge_handoffs(cutoff).await?;
        if challenges + handoffs > 0 {
            debug!(challenges, handoffs, "Purged expired authorization state");
        }
        Ok(challenges + handoffs)
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        Utc::now() - created_at > self.challenge_ttl
    }

    fn refresh_slot(&self, user_id: i64, kind: ProviderKind) -> RefreshSlot<'_> {
        let key = (user_id, kind);
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let lock = locks.entry(key).or_default().clone();
        RefreshSlot {
            locks: &self.refresh_locks,
            key,
            lock,
        }
    }

    #[cfg(test)]
    pub(crate) fn refresh_lock_count(&self) -> usize {
        self.refresh_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

type RefreshLocks = Mutex<HashMap<(i64, ProviderKind), Arc<tokio::sync::Mutex<()>>>>;

/// A refresh in progress; the map entry goes away with its last holder
struct RefreshSlot<'a> {
    locks: &'a RefreshLocks,
    key: (i64, ProviderKind),
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for RefreshSlot<'_> {
    fn drop(&mut self) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // clones are only handed out under the map lock: two means the map and us
        if Arc::strong_count(&self.lock) <= 2 {
            locks.remove(&self.key);
        }
    }
}

fn token_record(
    user_id: i64,
    provider: ProviderKind,
    tokens: TokenResponse,
    retained_refresh_token: Option<String>,
) -> TokenRecord {
    let now = Utc::now();
    TokenRecord {
        user_id,
        provider,
        access_token: tokens.access_token,
        refresh_token: tokens
            .refresh_token
            .filter(|t| !t.is_empty())
            .or(retained_refresh_token),
        // ProviderClient rejects lifetimes outside 1..=MAX_TOKEN_LIFETIME_SECONDS
        expires_at: tokens.expires_in.map(|secs| now + Duration::seconds(secs)),
        updated_at: now,
    }
}

/// Local usernames allow `[A-Za-z0-9_.-]`, 3 to 32 characters
fn sanitize_username(raw: &str, kind: ProviderKind) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .take(26)
        .collect();

    if cleaned.len() >= 3 {
        cleaned
    } else {
        format!("{}_{}", kind, generate_raw_id(6).to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_username() {
        assert_eq!(sanitize_username("alice", ProviderKind::Github), "alice");
        assert_eq!(sanitize_username("bob smith!", ProviderKind::Google), "bobsmith");

        let fallback = sanitize_username("é", ProviderKind::Google);
        assert!(fallback.starts_with("google_"));
        assert_eq!(fallback.len(), "google_".len() + 6);

        let long = sanitize_username(&"x".repeat(60), ProviderKind::Github);
        assert_eq!(long.len(), 26);
    }

    #[test]
    fn test_token_record_expiry_and_retention() {
        let tokens = TokenResponse {
            access_token: "AT".to_string(),
            refresh_token: None,
            expires_in: Some(7200),
            token_type: None,
            scope: None,
        };
        let record = token_record(1, ProviderKind::Twitter, tokens, Some("RT-old".to_string()));
        assert_eq!(record.refresh_token.as_deref(), Some("RT-old"));

        let expires_at = record.expires_at.unwrap();
        let delta = (expires_at - Utc::now()).num_seconds();
        assert!((7190..=7200).contains(&delta));
    }

    #[test]
    fn test_new_refresh_token_wins_over_retained() {
        let tokens = TokenResponse {
            access_token: "AT2".to_string(),
            refresh_token: Some("RT2".to_string()),
            expires_in: None,
            token_type: None,
            scope: None,
        };
        let record = token_record(1, ProviderKind::Google, tokens, Some("RT1".to_string()));
        assert_eq!(record.refresh_token.as_deref(), Some("RT2"));
        assert!(record.expires_at.is_none());
    }
}
