//! Tests for auth module
//!
//! These tests drive the HTTP surface over memory storage:
//! - registration, login and validation failures
//! - bearer session checks and logout revocation
//! - cross-user access rules
//! - social sign-in handoff redemption

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::app::testing::{get_request, json_request, send, test_app, TestApp};
    use crate::auth::models::{NewUser, Role};
    use crate::storage::Storage;

    async fn register(app: &TestApp, username: &str) -> (i64, String) {
        let (status, _, body) = send(
            app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({"username": username, "password": "correct-horse", "email": format!("{}@example.com", username)}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_register_returns_session() {
        let app = test_app(None);

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({"username": "alice", "password": "correct-horse"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        assert!(!body["token"].as_str().unwrap().is_empty());
        assert_eq!(body["user"]["username"], "alice");
        assert_eq!(body["user"]["role"], "free");
        assert!(body["user"].get("passwordHash").is_none());

        let stored = app.storage.get_user_by_username("alice").await.unwrap().unwrap();
        assert!(stored.password_hash.starts_with("$argon2"));
    }

    #[tokio::test]
    async fn test_register_with_multibyte_email_is_logged() {
        let _subscriber = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::INFO)
                .finish(),
        );
        let app = test_app(None);

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({"username": "elodie", "password": "correct-horse", "email": "é@example.com"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
        assert_eq!(body["user"]["email"], "é@example.com");
    }

    #[tokio::test]
    async fn test_register_duplicate_username_conflicts() {
        let app = test_app(None);
        register(&app, "alice").await;

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({"username": "alice", "password": "another-pass"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_register_validation_errors() {
        let app = test_app(None);

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/register",
                None,
                json!({"username": "a", "password": "short", "email": "nope"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION_ERROR");
        let message = body["error"].as_str().unwrap();
        assert!(message.contains("username"));
        assert!(message.contains("password"));
        assert!(message.contains("email"));
    }

    #[tokio::test]
    async fn test_login_success_and_failure() {
        let app = test_app(None);
        register(&app, "alice").await;

        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({"username": "alice", "password": "correct-horse"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["token"].is_string());

        let (status, _, wrong_password) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({"username": "alice", "password": "wrong-horse"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // unknown users get the same answer
        let (status, _, unknown_user) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({"username": "mallory", "password": "correct-horse"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password, unknown_user);
    }

    #[tokio::test]
    async fn test_me_requires_valid_bearer() {
        let app = test_app(None);
        let (user_id, token) = register(&app, "alice").await;

        let (status, _, body) = send(&app, get_request("/api/me", Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], user_id);
        assert_eq!(body["is_admin"], false);

        let (status, _, _) = send(&app, get_request("/api/me", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _, _) = send(&app, get_request("/api/me", Some("not-a-jwt"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_revokes_issued_sessions() {
        let app = test_app(None);
        let (_, token) = register(&app, "alice").await;

        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/auth/logout", Some(&token), json!({})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Logout successful");

        let (status, _, body) = send(&app, get_request("/api/me", Some(&token))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        // a fresh login works again
        let (status, _, body) = send(
            &app,
            json_request(
                "POST",
                "/api/auth/login",
                None,
                json!({"username": "alice", "password": "correct-horse"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let fresh = body["token"].as_str().unwrap();
        let (status, _, _) = send(&app, get_request("/api/me", Some(fresh))).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_get_user_is_self_or_admin() {
        let app = test_app(None);
        let (alice_id, alice_token) = register(&app, "alice").await;
        let (bob_id, _) = register(&app, "bob").await;

        let (status, _, body) = send(
            &app,
            get_request(&format!("/api/users/{}", alice_id), Some(&alice_token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "alice");

        let (status, _, body) = send(
            &app,
            get_request(&format!("/api/users/{}", bob_id), Some(&alice_token)),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let admin = app
            .storage
            .create_user(NewUser {
                username: "root".to_string(),
                password_hash: "unused".to_string(),
                email: None,
                display_name: None,
                profile_image: None,
                role: Role::Admin,
            })
            .await
            .unwrap();
        let admin_token = app.sessions.issue(&admin).unwrap();

        let (status, _, body) = send(
            &app,
            get_request(&format!("/api/users/{}", bob_id), Some(&admin_token)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], "bob");

        let (status, _, _) = send(
            &app,
            get_request("/api/users/9999", Some(&admin_token)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handoff_redeems_once() {
        let app = test_app(None);
        let (user_id, _) = register(&app, "alice").await;

        let code = "handoff-code-0123456789";
        app.storage
            .put_handoff(&crate::auth::models::LoginHandoff {
                code: code.to_string(),
                user_id,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/auth/handoff", None, json!({"code": code})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], user_id);
        let token = body["token"].as_str().unwrap();
        let (status, _, _) = send(&app, get_request("/api/me", Some(token))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _, body) = send(
            &app,
            json_request("POST", "/api/auth/handoff", None, json!({"code": code})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_STATE");
    }

    #[tokio::test]
    async fn test_health_reports_storage() {
        let app = test_app(None);

        let (status, _, body) = send(&app, get_request("/api/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["storage"], "memory");
    }
}
