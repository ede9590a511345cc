// src/storage/memory.rs
//! In-process storage backed by hash maps behind a single lock

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Storage, StorageError};
use crate::auth::models::{LoginHandoff, NewUser, User};
use crate::oauth::models::{LinkedIdentity, PkceChallenge, ProviderKind, TokenRecord};

#[derive(Debug, Default)]
struct MemoryState {
    next_user_id: i64,
    users: HashMap<i64, User>,
    tokens: HashMap<(i64, ProviderKind), TokenRecord>,
    identities: HashMap<(i64, ProviderKind), LinkedIdentity>,
    challenges: HashMap<String, PkceChallenge>,
    handoffs: HashMap<String, LoginHandoff>,
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StorageError> {
        Ok(self.inner.read().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StorageError> {
        let state = self.inner.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        let state = self.inner.read().await;
        Ok(state
            .users
            .values()
            .find(|u| {
                u.email
                    .as_deref()
                    .map_or(false, |e| e.eq_ignore_ascii_case(email))
            })
            .cloned())
    }

    async fn create_user(&self, new_user: NewUser) -> Result<User, StorageError> {
        let mut state = self.inner.write().await;
        if state.users.values().any(|u| u.username == new_user.username) {
            return Err(StorageError::Conflict(format!(
                "username {} is already taken",
                new_user.username
            )));
        }

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: new_user.username,
            password_hash: new_user.password_hash,
            email: new_user.email,
            display_name: new_user.display_name,
            profile_image: new_user.profile_image,
            role: new_user.role,
            session_version: 0,
            created_at: Utc::now(),
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn fill_profile(
        &self,
        id: i64,
        display_name: Option<&str>,
        profile_image: Option<&str>,
    ) -> Result<(), StorageError> {
        let mut state = self.inner.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;

        if user.display_name.is_none() {
            user.display_name = display_name.map(str::to_string);
        }
        if user.profile_image.is_none() {
            user.profile_image = profile_image.map(str::to_string);
        }
        Ok(())
    }

    async fn bump_session_version(&self, id: i64) -> Result<i64, StorageError> {
        let mut state = self.inner.write().await;
        let user = state
            .users
            .get_mut(&id)
            .ok_or_else(|| StorageError::NotFound(format!("user {}", id)))?;
        user.session_version += 1;
        Ok(user.session_version)
    }

    async fn get_tokens(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<Option<TokenRecord>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .tokens
            .get(&(user_id, provider))
            .cloned())
    }

    async fn save_tokens(&self, record: &TokenRecord) -> Result<(), StorageError> {
        let mut state = self.inner.write().await;
        if !state.users.contains_key(&record.user_id) {
            return Err(StorageError::NotFound(format!("user {}", record.user_id)));
        }
        state
            .tokens
            .insert((record.user_id, record.provider), record.clone());
        Ok(())
    }

    async fn delete_tokens(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<bool, StorageError> {
        Ok(self
            .inner
            .write()
            .await
            .tokens
            .remove(&(user_id, provider))
            .is_some())
    }

    async fn get_identity(
        &self,
        user_id: i64,
        provider: ProviderKind,
    ) -> Result<Option<LinkedIdentity>, StorageError> {
        Ok(self
            .inner
            .read()
            .await
            .identities
            .get(&(user_id, provider))
            .cloned())
    }

    async fn find_identity(
        &self,
        provider: ProviderKind,
        provider_id: &str,
    ) -> Result<Option<LinkedIdentity>, StorageError> {
        let state = self.inner.read().await;
        Ok(state
            .identities
            .values()
            .find(|i| i.provider == provider && i.provider_id == provider_id)
            .cloned())
    }

    async fn upsert_identity(&self, identity: &LinkedIdentity) -> Result<(), StorageError> {
        let mut state = self.inner.write().await;
        if !state.users.contains_key(&identity.user_id) {
            return Err(StorageError::NotFound(format!("user {}", identity.user_id)));
        }

        let taken = state.identities.values().any(|i| {
            i.provider == identity.provider
                && i.provider_id == identity.provider_id
                && i.user_id != identity.user_id
        });
        if taken {
            return Err(StorageError::Conflict(format!(
                "{} account {} is linked to another user",
                identity.provider, identity.provider_id
            )));
        }

        state
            .identities
            .insert((identity.user_id, identity.provider), identity.clone());
        Ok(())
    }

    async fn disconnect(&self, user_id: i64, provider: ProviderKind) -> Result<(), StorageError> {
        let mut state = self.inner.write().await;
        state.tokens.remove(&(user_id, provider));
        state.identities.remove(&(user_id, provider));
        Ok(())
    }

    async fn put_challenge(&self, challenge: &PkceChallenge) -> Result<(), StorageError> {
        let mut state = self.inner.write().await;
        if let Some(user_id) = challenge.user_id {
            state
                .challenges
                .retain(|_, c| !(c.user_id == Some(user_id) && c.provider == challenge.provider));
        }
        state
            .challenges
            .insert(challenge.state.clone(), challenge.clone());
        Ok(())
    }

    async fn take_challenge(&self, state: &str) -> Result<Option<PkceChallenge>, StorageError> {
        Ok(self.inner.write().await.challenges.remove(state))
    }

    async fn purge_challenges(&self, created_before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut state = self.inner.write().await;
        let before = state.challenges.len();
        state.challenges.retain(|_, c| c.created_at >= created_before);
        Ok((before - state.challenges.len()) as u64)
    }

    async fn put_handoff(&self, handoff: &LoginHandoff) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .handoffs
            .insert(handoff.code.clone(), handoff.clone());
        Ok(())
    }

    async fn take_handoff(&self, code: &str) -> Result<Option<LoginHandoff>, StorageError> {
        Ok(self.inner.write().await.handoffs.remove(code))
    }

    async fn purge_handoffs(&self, created_before: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut state = self.inner.write().await;
        let before = state.handoffs.len();
        state.handoffs.retain(|_, h| h.created_at >= created_before);
        Ok((before - state.handoffs.len()) as u64)
    }
}
