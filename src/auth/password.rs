//! Argon2id password hashing (PHC string format)
//!
//! Hashing and verification are CPU bound; the async variants run them on
//! tokio's blocking pool so request workers stay free.

use argon2::password_hash::{self, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::task::{self, JoinError};

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(password_hash::Error),

    #[error("password worker failed: {0}")]
    Worker(#[from] JoinError),
}

pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// False for a wrong password and for an unparseable stored hash
pub fn verify_password(hash: &str, password: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    task::spawn_blocking(move || hash_password(&password))
        .await?
        .map_err(PasswordError::Hash)
}

/// Verify against `hash`, or against a throwaway hash when there is no
/// account, so both cases cost one Argon2 run
pub async fn verify_password_blocking(
    hash: Option<String>,
    password: String,
) -> Result<bool, PasswordError> {
    let verified = task::spawn_blocking(move || match hash {
        Some(hash) => verify_password(&hash, &password),
        None => {
            verify_password(absent_account_hash(), &password);
            false
        }
    })
    .await?;
    Ok(verified)
}

fn absent_account_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| hash_password("absent-account").unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password(&hash, "correct horse battery"));
        assert!(!verify_password(&hash, "wrong password"));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same").unwrap(), hash_password("same").unwrap());
    }

    #[test]
    fn test_garbage_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "anything"));
        assert!(!verify_password("", ""));
    }

    #[tokio::test]
    async fn test_blocking_variants() {
        let hash = hash_password_blocking("correct horse".to_string())
            .await
            .unwrap();
        assert!(verify_password_blocking(Some(hash.clone()), "correct horse".to_string())
            .await
            .unwrap());
        assert!(!verify_password_blocking(Some(hash), "wrong horse".to_string())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_absent_account_runs_a_real_verification() {
        assert!(absent_account_hash().starts_with("$argon2id$"));
        assert!(PasswordHash::new(absent_account_hash()).is_ok());

        // even the password the throwaway hash was made from is refused
        assert!(!verify_password_blocking(None, "absent-account".to_string())
            .await
            .unwrap());
        assert!(!verify_password_blocking(None, String::new()).await.unwrap());
    }
}
