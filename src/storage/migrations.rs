// src/storage/migrations.rs
//! SQLite schema management

use sqlx::SqlitePool;
use std::env;
use tracing::{info, warn};

/// Run all database migrations
///
/// Tables are created if they don't exist. Set `RESET_DB=true` to drop
/// everything first.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let should_reset_db = env::var("RESET_DB").unwrap_or_else(|_| "false".to_string()) == "true";

    if should_reset_db {
        warn!("RESET_DB=true - dropping all tables and recreating schema");
        drop_all_tables(pool).await?;
    }

    create_user_tables(pool).await?;
    create_oauth_tables(pool).await?;
    create_indexes(pool).await?;

    info!("Database migration completed successfully");
    Ok(())
}

async fn drop_all_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // Reverse dependency order
    let tables = [
        "login_handoffs",
        "pkce_challenges",
        "linked_identities",
        "oauth_tokens",
        "users",
    ];

    for table in tables {
        sqlx::query(&format!("DROP TABLE IF EXISTS {}", table))
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn create_user_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT UNIQUE NOT NULL,
            password_hash TEXT NOT NULL,
            email TEXT,
            display_name TEXT,
            profile_image TEXT,
            role TEXT NOT NULL DEFAULT 'free',
            session_version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_oauth_tables(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    // One token record per (user, provider)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oauth_tokens (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            access_token TEXT NOT NULL,
            refresh_token TEXT,
            encrypted INTEGER NOT NULL DEFAULT 0,
            expires_at INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, provider)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // A provider subject belongs to at most one local user
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS linked_identities (
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            provider TEXT NOT NULL,
            provider_id TEXT NOT NULL,
            username TEXT NOT NULL,
            display_name TEXT,
            avatar_url TEXT,
            email TEXT,
            linked_at INTEGER NOT NULL,
            PRIMARY KEY (user_id, provider),
            UNIQUE (provider, provider_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pkce_challenges (
            state TEXT PRIMARY KEY,
            provider TEXT NOT NULL,
            user_id INTEGER,
            verifier TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS login_handoffs (
            code TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_indexes(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE)",
        "CREATE INDEX IF NOT EXISTS idx_pkce_user_provider ON pkce_challenges(user_id, provider)",
        "CREATE INDEX IF NOT EXISTS idx_pkce_created_at ON pkce_challenges(created_at)",
        "CREATE INDEX IF NOT EXISTS idx_handoffs_created_at ON login_handoffs(created_at)",
    ];

    for statement in indexes {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}
