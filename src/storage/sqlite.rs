// src/storage/sqlite.rs
//! SQLite-backed storage
//!
//! Timestamps are stored as unix seconds. Provider tokens are sealed with
//! AES-GCM when an encryption key is configured; the `encrypted` column
//! records how each row was written so a key can be introduced later.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use super::{migrations, Storage, StorageError};
use crate::auth::models::{LoginHandoff, NewUser, Role, User};
use crate::oauth::models::{LinkedIdentity, PkceChallenge, ProviderKind, TokenRecord};
use crate::services::encryption::EncryptionService;

pub struct SqliteStorage {
    pub(super) pool: SqlitePool,
    encryption: Option<Arc<EncryptionService>>,
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool, encryption: Option<Arc<EncryptionService>>) -> Self {
        Self { pool, encryption }
    }

    /// Open (creating if missing) the database at `url` and bring the schema up to date
    pub async fn connect(
        url: &str,
        encryption: Option<Arc<EncryptionService>>,
    ) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrations::run_migrations(&pool).await?;
        info!("Connected to SQLite database");

        Ok(Self::new(pool, encryption))
    }

    fn seal(&self, value: &str) -> Result<String, StorageError> {
        match &self.encryption {
            Some(service) => Ok(service.encrypt(value)?),
            None => Ok(value.to_string()),
        }
    }

    fn unseal(&self, value: String, encrypted: bool) -> Result<String, StorageError> {
        if !encrypted {
            return Ok(value);
        }
        match &self.encryption {
            Some(service) => Ok(service.decrypt(&value)?),
            None => Err(StorageError::Corrupt(
                "token stored encrypted but no TOKEN_ENCRYPTION_KEY is configured".to_string(),
            )),
        }
    }
}

fn from_unix(seconds: i64) -> Result<DateTime<Utc>, StorageError> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| StorageError::Corrupt(format!("timestamp out of range: {}", seconds)))
}

fn parse_provider(value: &str) -> Result<ProviderKind, StorageError> {
    ProviderKind::from_str(value)
        .map_err(|p| StorageError::Corrupt(format!("unknown provider: {}", p)))
}

fn map_unique(err: sqlx::Error, message: impl FnOnce() -> String) -> StorageError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StorageError::Conflict(message())
        }
        _ => StorageError::Database(err),
    }
}

#[derive(FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    email: Option<String>,
    display_name: Option<String>,
    profile_image: Option<String>,
    role: String,
    session_version: i64,
    created_at: i64,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            email: row.email,
            display_name: row.display_name,
            profile_image: row.profile_image,
            role: Role::from_str(&row.role).map_err(StorageError::Corrupt)?,
            session_version: row.session_version,
            created_at: from_unix(row.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    user_id: i64,
    provider: String,
    access_token: String,
    refresh_token: Option<String>,
    encrypted: bool,
    expires_at: Option<i64>,
    updated_at: i64,
}

#[derive(FromRow)]
struct IdentityRow {
    user_id: i64,
    provider: String,
    provider_id: String,
    username: String,
    display_name: Option<String>,
    avatar_url: Option<String>,
    email: Option<String>,
    linked_at: i64,
}

impl TryFrom<IdentityRow> for LinkedIdentity {
    type Error = StorageError;

    fn try_from(row: IdentityRow) -> Result<Self, Self::Error> {
        Ok(LinkedIdentity {
            user_id: row.user_id,
            provider: parse_provider(&row.provider)?,
            provider_id: row.provider_id,
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
            email: row.email,
            linked_at: from_unix(row.linked_at)?,
        })
    }
}

#[derive(FromRow)]
struct ChallengeRow {
    state: String,
    provider: String,
    user_id: Option<i64>,
    verifier: String,
    created_at: i64,
}

impl TryFrom<ChallengeRow> for PkceChallenge {
    type Error = StorageError;

    fn try_from(row: ChallengeRow) -> Result<Self, Self::Error> {
        Ok(PkceChallenge {
            state: row.state,
            provider: parse_provider(&row.provider)?,
            user_id: row.user_id,
            verifier: row.verifier,
            created_at: from_unix(row.created_at)?,
        })
    }
}

#[derive(FromRow)]
struct HandoffRow {
    code: String,
    user_id: i64,
    created_at: i64,
}

const USER_COLUMNS: &str = "id, username, password_hash, email, display_name, profile_image, \
                            role, session_version, created_at";

#[async_trait]
impl Storage for SqliteStorage {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE username = ?",
            USER_COLUMNS
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE email = ? COLLATE NOCASE ORDER BY id LIMIT 1",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StorageError> {
        let created_at = Utc::now().timestamp();

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO users (username, password_hash, email, display_name, profile_image, role, session_version, created_at)
            VALUES (?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING id
            "#,
        )
        .bind(&new_user.username)
        .bind(&new_user.password_hash)
        .bind(&new_user.email)
        .bind(&new_user.display_name)
        .bind(&new_user.profile_image)
        .bind(new_user.role.as_str())
        .bind(created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            map_unique(e, || {
                format!("username {} is already taken", new_user.username)
            })
        })?;

        Ok(User {
            id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            email: new_user.email,
            display_name: new_user.display_name,
            profile_image: new_user.profile_image,
            role: new_user.role,
            session_version: 0,
            created_at: from_unix(created_at)?,
        })
    }

    async fn fill_profile(
        &self,
        id: i64,
        display_name: Option<&str>,
        profile_image: Option<&str>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET display_name = COALESCE(display_name, ?),
                profile_image = COALESCE(profile_image, ?)
            WHERE id = ?
            "#,
        )
        .bind(display_name)
        .bind(profile_image)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("user {}", id)));
        }
        Ok(())
    }

    async fn bump_session_version(&self, id: i64) -> Result<i64, StorageError> {
        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET session_version = session_version + 1 WHERE id = ? RETURNING session_version",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        version.ok_or_else(|| StorageError::NotFound(format!("user {}", id)))
    }

    async fn get_tokens(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<Option<TokenRecord>, StorageError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT user_id, provider, access_token, refresh_token, encrypted, expires_at, updated_at
            FROM oauth_tokens
            WHERE user_id = ? AND provider = ?
            "#,
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        Ok(Some(TokenRecord {
            user_id: row.user_id,
            provider: parse_provider(&row.provider)?,
            access_token: self.unseal(row.access_token, row.encrypted)?,
            refresh_token: row
                .refresh_token
                .map(|t| self.unseal(t, row.encrypted))
                .transpose()?,
            expires_at: row.expires_at.map(from_unix).transpose()?,
            updated_at: from_unix(row.updated_at)?,
        }))
    }

    async fn save_tokens(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let access_token = self.seal(&record.access_token)?;
        let refresh_token = record
            .refresh_token
            .as_deref()
            .map(|t| self.seal(t))
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        let user_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(record.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if user_exists.is_none() {
            return Err(StorageError::NotFound(format!("user {}", record.user_id)));
        }

        sqlx::query(
            r#"
            INSERT INTO oauth_tokens (user_id, provider, access_token, refresh_token, encrypted, expires_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                encrypted = excluded.encrypted,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.user_id)
        .bind(record.provider.as_str())
        .bind(access_token)
        .bind(refresh_token)
        .bind(self.encryption.is_some())
        .bind(record.expires_at.map(|t| t.timestamp()))
        .bind(record.updated_at.timestamp())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn delete_tokens(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM oauth_tokens WHERE user_id = ? AND provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_identity(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<Option<LinkedIdentity>, StorageError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT * FROM linked_identities WHERE user_id = ? AND provider = ?",
        )
        .bind(user_id)
        .bind(provider.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(LinkedIdentity::try_from).transpose()
    }

    async fn find_identity(
        &self,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<LinkedIdentity>, StorageError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT * FROM linked_identities WHERE provider = ? AND provider_id = ?",
        )
        .bind(provider.as_str())
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LinkedIdentity::try_from).transpose()
    }

    async fn upsert_identity(&self, identity: &LinkedIdentity) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        let user_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(identity.user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if user_exists.is_none() {
            return Err(StorageError::NotFound(format!("user {}", identity.user_id)));
        }

        let owner: Option<i64> = sqlx::query_scalar(
            "SELECT user_id FROM linked_identities WHERE provider = ? AND provider_id = ?",
        )
        .bind(identity.provider.as_str())
        .bind(&identity.provider_id)
        .fetch_optional(&mut *tx)
        .await?;

        if matches!(owner, Some(owner) if owner != identity.user_id) {
            return Err(StorageError::Conflict(format!(
                "{} account {} is linked to another user",
                identity.provider, identity.provider_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO linked_identities (user_id, provider, provider_id, username, display_name, avatar_url, email, linked_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, provider) DO UPDATE SET
                provider_id = excluded.provider_id,
                username = excluded.username,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                email = excluded.email,
                linked_at = excluded.linked_at
            "#,
        )
        .bind(identity.user_id)
        .bind(identity.provider.as_str())
        .bind(&identity.provider_id)
        .bind(&identity.username)
        .bind(&identity.display_name)
        .bind(&identity.avatar_url)
        .bind(&identity.email)
        .bind(identity.linked_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            map_unique(e, || {
                format!(
                    "{} account {} is linked to another user",
                    identity.provider, identity.provider_id
                )
            })
        })?;

        tx.commit().await?;
        Ok(())
    }

    async fn disconnect(&self, user_id: i64, provider: ProviderKind) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM oauth_tokens WHERE user_id = ? AND provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM linked_identities WHERE user_id = ? AND provider = ?")
            .bind(user_id)
            .bind(provider.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn put_challenge(&self, challenge: &PkceChallenge) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        if let Some(user_id) = challenge.user_id {
            sqlx::query("DELETE FROM pkce_challenges WHERE user_id = ? AND provider = ?")
                .bind(user_id)
                .bind(challenge.provider.as_str())
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            "INSERT INTO pkce_challenges (state, provider, user_id, verifier, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&challenge.state)
        .bind(challenge.provider.as_str())
        .bind(challenge.user_id)
        .bind(&challenge.verifier)
        .bind(challenge.created_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_unique(e, || "duplicate state value".to_string()))?;

        tx.commit().await?;
        Ok(())
    }

    async fn take_challenge(&self, state: &str) -> Result<Option<PkceChallenge>, StorageError> {
        let row = sqlx::query_as::<_, ChallengeRow>(
            "DELETE FROM pkce_challenges WHERE state = ? RETURNING state, provider, user_id, verifier, created_at",
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PkceChallenge::try_from).transpose()
    }

    async fn purge_challenges(&self, created_before: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM pkce_challenges WHERE created_at < ?")
            .bind(created_before.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn put_handoff(&self, handoff: &LoginHandoff) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO login_handoffs (code, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&handoff.code)
            .bind(handoff.user_id)
            .bind(handoff.created_at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| map_unique(e, || "duplicate handoff code".to_string()))?;

        Ok(())
    }

    async fn take_handoff(&self, code: &str) -> Result<Option<LoginHandoff>, StorageError> {
        let row = sqlx::query_as::<_, HandoffRow>(
            "DELETE FROM login_handoffs WHERE code = ? RETURNING code, user_id, created_at",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok::<_, StorageError>(LoginHandoff {
                code: r.code,
                user_id: r.user_id,
                created_at: from_unix(r.created_at)?,
            })
        })
        .transpose()
    }

    async fn purge_handoffs(&self, created_before: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM login_handoffs WHERE created_at < ?")
            .bind(created_before.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
