//! # Storage Module
//!
//! Persistence capability for users, provider token records, linked
//! identities, pending PKCE challenges and sign-in handoff codes.
//!
//! Two backings implement [`Storage`]:
//! - [`MemoryStorage`] for tests and single-process demos
//! - [`SqliteStorage`] for durable deployments
//!
//! Every method is atomic from the caller's point of view: a reader never
//! observes a half-written token record or identity link.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::auth::models::{LoginHandoff, NewUser, User};
use crate::oauth::models::{LinkedIdentity, PkceChallenge, ProviderKind, TokenRecord};
use crate::services::encryption::EncryptionError;

pub mod memory;
pub mod migrations;
pub mod sqlite;


pub use memory::MemoryStorage;
pub use sqlite::SqliteStorage;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Encryption error: {0}")]
    Encryption(#[from] EncryptionError),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Short name of the backing, reported by the health endpoint
    fn backend_name(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StorageError>;

    // ---- Users ----

    async fn get_user(&self, id: i64) -> Result<Option<User>, StorageError>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError>;

    /// Case-insensitive email lookup
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError>;

    /// Fails with `Conflict` when the username is taken
    async fn create_user(&self, new_user: NewUser) -> Result<User, StorageError>;

    /// Sets display name / profile image only where they are currently empty
    async fn fill_profile(
        &self,
        id: i64,
        display_name: Option<&str>,
        profile_image: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Increments the session version and returns the new value
    async fn bump_session_version(&self, id: i64) -> Result<i64, StorageError>;

    // ---- Provider tokens ----

    async fn get_tokens(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<Option<TokenRecord>, StorageError>;

    /// Inserts or wholesale replaces the record for (user, provider)
    async fn save_tokens(&self, record: &TokenRecord) -> Result<(), StorageError>;

    async fn delete_tokens(&self, user_id: i64, provider: ProviderKind)
        -> Result<bool, StorageError>;

    // ---- Linked identities ----

    async fn get_identity(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<Option<LinkedIdentity>, StorageError>;

    async fn find_identity(
        &self,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<LinkedIdentity>, StorageError>;

    /// Fails with `Conflict` when the provider subject is linked to another user
    async fn upsert_identity(&self, identity: &LinkedIdentity) -> Result<(), StorageError>;

    /// Removes token record and identity link together; a no-op when neither exists
    async fn disconnect(&self, user_id: i64, provider: ProviderKind) -> Result<(), StorageError>;

    // ---- PKCE challenges ----

    /// Stores a challenge, dropping other pending challenges of the same user and provider
    async fn put_challenge(&self, challenge: &PkceChallenge) -> Result<(), StorageError>;

    /// Reads and deletes in one step; a state can be taken at most once
    async fn take_challenge(&self, state: &str) -> Result<Option<PkceChallenge>, StorageError>;

    async fn purge_challenges(&self, created_before: DateTime<Utc>) -> Result<u64, StorageError>;

    // ---- Sign-in handoff codes ----

    async fn put_handoff(&self, handoff: &LoginHandoff) -> Result<(), StorageError>;

    async fn take_handoff(&self, code: &str) -> Result<Option<LoginHandoff>, StorageError>;

    async fn purge_handoffs(&self, created_before: DateTime<Utc>) -> Result<u64, StorageError>;
}
