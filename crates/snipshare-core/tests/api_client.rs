use std::sync::Arc;
use std::time::Duration;

use mockito::{Matcher, Server, ServerGuard};
use serde_json::json;
use snipshare_core::api::{ApiClient, ApiError, ApiRequest, RetryPolicy};
use snipshare_core::auth::{AuthState, Credential, CredentialStore, MemoryKeyProvider};
use snipshare_core::models::{PasswordReset, ProfileUpdate, RegisterRequest, ResetPasswordRequest, Snippet};

struct Harness {
    server: ServerGuard,
    client: ApiClient,
    store: Arc<CredentialStore>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let server = Server::new_async().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(CredentialStore::open(dir.path(), Arc::new(MemoryKeyProvider::new())).unwrap());
    let client = ApiClient::builder(format!("{}/api/v1/", server.url()))
        .timeout(Duration::from_secs(5))
        .retry_policy(RetryPolicy {
            base_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        })
        .build(store.clone())
        .unwrap();
    Harness {
        server,
        client,
        store,
        _dir: dir,
    }
}

fn user_json() -> serde_json::Value {
    json!({
        "id": "7",
        "username": "ada",
        "email": "ada@example.test",
        "full_name": "Ada Lovelace",
        "is_admin": false
    })
}

// ============================================================================
// Core request behaviour
// ============================================================================

#[tokio::test]
async fn test_snippet_sends_bearer_and_decodes() {
    let mut h = harness().await;
    h.store.save(&Credential::new("abc123")).unwrap();

    let mock = h
        .server
        .mock("GET", "/api/v1/snippets/42")
        .match_header("authorization", "Bearer abc123")
        .match_header("accept", "application/json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"id":42,"body":"print('hi')"}"#)
        .expect(1)
        .create_async()
        .await;

    let snippet = h.client.snippet(42).await.unwrap();
    assert_eq!(
        snippet,
        Snippet {
            id: 42,
            body: "print('hi')".to_string(),
            ..Default::default()
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_unauthorized_clears_stored_credential() {
    let mut h = harness().await;
    h.store.save(&Credential::new("abc123")).unwrap();

    let mock = h
        .server
        .mock("GET", "/api/v1/snippets/42")
        .with_status(401)
        .with_body(r#"{"message":"Unauthenticated."}"#)
        .expect(1)
        .create_async()
        .await;

    let err = h.client.snippet(42).await.unwrap_err();
    assert!(matches!(err, ApiError::Unauthorized), "got {:?}", err);
    assert!(h.store.load().unwrap().is_none());
    assert_eq!(h.store.state(), AuthState::SignedOut);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let mut h = harness().await;
    let mock = h
        .server
        .mock("GET", "/api/v1/snippets/1")
        .with_status(500)
        .with_body(r#"{"message":"Server Error"}"#)
        .expect(1)
        .create_async()
        .await;

    let err = h.client.snippet(1).await.unwrap_err();
    match &err {
        ApiError::ServerError { status, message, body } => {
            assert_eq!(*status, 500);
            assert_eq!(message.as_deref(), Some("Server Error"));
            assert_eq!(body, r#"{"message":"Server Error"}"#);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.user_message(), "Server Error");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_schema_mismatch_is_decode_error() {
    let mut h = harness().await;
    h.server
        .mock("GET", "/api/v1/snippets/5")
        .with_status(200)
        .with_body(r#"{"id":"five"}"#)
        .create_async()
        .await;

    let err = h.client.snippet(5).await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }), "got {:?}", err);
}

#[tokio::test]
async fn test_leading_slash_stays_under_base_path() {
    let mut h = harness().await;
    let mock = h
        .server
        .mock("HEAD", "/api/v1/health")
        .with_status(204)
        .create_async()
        .await;

    let response = h.client.send(ApiRequest::head("/health")).await.unwrap();
    assert_eq!(response.status().as_u16(), 204);
    assert_eq!(response.attempts(), 1);
    mock.assert_async().await;
}

// ============================================================================
// Authentication endpoints
// ============================================================================

#[tokio::test]
async fn test_login_persists_credential() {
    let mut h = harness().await;
    let mock = h
        .server
        .mock("POST", "/api/v1/auth/login")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!({
            "login": "ada",
            "password": "correct horse",
            "device_name": "test-device"
        })))
        .with_status(200)
        .with_body(
            json!({
                "success": true,
                "message": "Login successful",
                "data": {"user": user_json(), "token": "tok-1", "token_type": "Bearer"}
            })
            .to_string(),
        )
        .create_async()
        .await;

    let mut state = h.store.subscribe();
    let user = h.client.login("ada", "correct horse", "test-device").await.unwrap();
    assert_eq!(user.username, "ada");
    mock.assert_async().await;

    let credential = h.store.load().unwrap().expect("credential should be stored");
    assert_eq!(credential.authorization_value(), "Bearer tok-1");
    assert_eq!(credential.user.map(|u| u.email), Some("ada@example.test".to_string()));
    assert!(state.has_changed().unwrap());
    assert!(state.borrow_and_update().is_signed_in());
}

#[tokio::test]
async fn test_login_rejected_reports_field_error() {
    let mut h = harness().await;
    h.server
        .mock("POST", "/api/v1/auth/login")
        .with_status(422)
        .with_body(
            json!({
                "message": "The given data was invalid.",
                "errors": {"login": ["These credentials do not match our records."]}
            })
            .to_string(),
        )
        .expect(1)
        .create_async()
        .await;

    let err = h.client.login("ada", "wrong-password", "d").await.unwrap_err();
    assert_eq!(err.status(), Some(422));
    assert_eq!(err.user_message(), "These credentials do not match our records.");
    assert!(h.store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_login_without_token_saves_nothing() {
    let mut h = harness().await;
    h.server
        .mock("POST", "/api/v1/auth/login")
        .with_status(200)
        .with_body(json!({"success": true, "data": {"user": user_json()}}).to_string())
        .create_async()
        .await;

    let err = h.client.login("ada", "correct horse", "d").await.unwrap_err();
    assert!(matches!(err, ApiError::Decode { .. }), "got {:?}", err);
    assert!(h.store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_unsuccessful_envelope_is_server_error() {
    let mut h = harness().await;
    h.server
        .mock("POST", "/api/v1/auth/register")
        .with_status(200)
        .with_body(json!({"success": false, "message": "Registration is closed"}).to_string())
        .create_async()
        .await;

    let request = RegisterRequest {
        username: "ada".to_string(),
        email: "ada@example.test".to_string(),
        password: "correct horse".to_string(),
        password_confirmation: "correct horse".to_string(),
        device_name: "d".to_string(),
    };
    let err = h.client.register(&request).await.unwrap_err();
    match err {
        ApiError::ServerError { status, message, .. } => {
            assert_eq!(status, 200);
            assert_eq!(message.as_deref(), Some("Registration is closed"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_post_failure_is_sent_once() {
    let mut h = harness().await;
    let mock = h
        .server
        .mock("POST", "/api/v1/auth/logout-all")
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    h.store.save(&Credential::new("abc123")).unwrap();
    h.client.logout_all().await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn test_logout_clears_even_when_server_fails() {
    let mut h = harness().await;
    h.store.save(&Credential::new("abc123")).unwrap();
    let mock = h
        .server
        .mock("POST", "/api/v1/auth/logout")
        .match_header("authorization", "Bearer abc123")
        .with_status(500)
        .create_async()
        .await;

    let response = h.client.logout().await.unwrap();
    assert!(response.success);
    assert!(h.store.load().unwrap().is_none());
    assert!(!h.store.is_signed_in());
    mock.assert_async().await;
}

// ============================================================================
// Password reset
// ============================================================================

#[tokio::test]
async fn test_password_reset_flow_tracks_tokens() {
    let mut h = harness().await;
    h.server
        .mock("POST", "/api/v1/auth/forgot-password")
        .match_body(Matcher::Json(json!({"email": "ada@example.test"})))
        .with_status(200)
        .with_body(json!({"success": true, "data": {"token": "reset-1", "expires_in": 600}}).to_string())
        .create_async()
        .await;
    h.server
        .mock("POST", "/api/v1/auth/verify-otp")
        .match_body(Matcher::Json(json!({
            "email": "ada@example.test",
            "otp": "123456",
            "token": "reset-1"
        })))
        .with_status(200)
        .with_body(
            json!({"success": true, "data": {"reset_token": "verified-2", "email": "ada@example.test"}})
                .to_string(),
        )
        .create_async()
        .await;
    h.server
        .mock("POST", "/api/v1/auth/reset-password")
        .match_body(Matcher::PartialJson(json!({"token": "verified-2"})))
        .with_status(200)
        .with_body(json!({"success": true, "message": "Password has been reset"}).to_string())
        .create_async()
        .await;

    let data = h.client.forgot_password("ada@example.test").await.unwrap();
    assert_eq!(data.expires_in, 600);
    assert_eq!(
        h.store.load_password_reset().unwrap(),
        Some(PasswordReset {
            email: "ada@example.test".to_string(),
            token: "reset-1".to_string()
        })
    );

    h.client.verify_otp("ada@example.test", "123456", "reset-1").await.unwrap();
    let pending = h.store.load_password_reset().unwrap().unwrap();
    assert_eq!(pending.token, "verified-2");

    let response = h
        .client
        .reset_password(&ResetPasswordRequest {
            email: pending.email,
            token: pending.token,
            password: "new password".to_string(),
            password_confirmation: "new password".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.message.as_deref(), Some("Password has been reset"));
    assert!(h.store.load_password_reset().unwrap().is_none());
    // Resetting a password never signs anyone in.
    assert!(h.store.load().unwrap().is_none());
}

#[tokio::test]
async fn test_invalid_otp_keeps_pending_reset() {
    let mut h = harness().await;
    h.store
        .save_password_reset(&PasswordReset {
            email: "ada@example.test".to_string(),
            token: "reset-1".to_string(),
        })
        .unwrap();
    h.server
        .mock("POST", "/api/v1/auth/verify-otp")
        .with_status(422)
        .with_body(json!({"message": "Invalid or expired code"}).to_string())
        .create_async()
        .await;

    let err = h.client.verify_otp("ada@example.test", "000000", "reset-1").await.unwrap_err();
    assert_eq!(err.user_message(), "Invalid or expired code");
    assert_eq!(h.store.load_password_reset().unwrap().unwrap().token, "reset-1");
}

// ============================================================================
// Profile
// ============================================================================

#[tokio::test]
async fn test_current_user_refreshes_stored_user() {
    let mut h = harness().await;
    h.store.save(&Credential::new("abc123")).unwrap();
    h.server
        .mock("GET", "/api/v1/user")
        .with_status(200)
        .with_body(json!({"success": true, "data": user_json()}).to_string())
        .create_async()
        .await;

    let user = h.client.current_user().await.unwrap();
    assert_eq!(user.display_name(), "Ada Lovelace");
    let stored = h.store.load().unwrap().unwrap();
    assert_eq!(stored.token, "abc123");
    assert_eq!(stored.user, Some(user));
}

#[tokio::test]
async fn test_update_profile_sends_only_set_fields() {
    let mut h = harness().await;
    h.store.save(&Credential::new("abc123")).unwrap();
    let mock = h
        .server
        .mock("PUT", "/api/v1/user")
        .match_body(Matcher::Json(json!({"bio": "Analyst"})))
        .with_status(200)
        .with_body(json!({"success": true, "data": user_json()}).to_string())
        .create_async()
        .await;

    let mut update = ProfileUpdate::default();
    update.set("bio", "Analyst".to_string());
    h.client.update_profile(&update).await.unwrap();
    mock.assert_async().await;

    let empty = h.client.update_profile(&ProfileUpdate::default()).await.unwrap_err();
    assert!(matches!(empty, ApiError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_delete_account_signs_out() {
    let mut h = harness().await;
    h.store.save(&Credential::new("abc123")).unwrap();
    let mock = h
        .server
        .mock("DELETE", "/api/v1/user")
        .match_body(Matcher::Json(json!({"password": "correct horse"})))
        .with_status(200)
        .with_body(json!({"success": true, "message": "Account deleted"}).to_string())
        .create_async()
        .await;

    let response = h.client.delete_account("correct horse").await.unwrap();
    assert_eq!(response.message.as_deref(), Some("Account deleted"));
    assert!(h.store.load().unwrap().is_none());
    mock.assert_async().await;
}
