//! Integration tests for the device-authorization login flow.
//!
//! A mock identity provider drives every branch of the RFC 8628
//! classification: pending, slow_down, denial, expiry, and timeout.

use std::time::Instant;

use fz::auth::device_flow::{browser_login, DeviceEndpoints};
use fz::error::CliError;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLIENT_ID: &str = "client_test";

fn endpoints(server: &MockServer) -> DeviceEndpoints {
    DeviceEndpoints {
        authorize_url: format!("{}/device/authorize", server.uri()),
        token_url: format!("{}/device/token", server.uri()),
        open_browser: false,
    }
}

async fn mount_authorization(server: &MockServer, expires_in: u64, interval: u64) {
    Mock::given(method("POST"))
        .and(path("/device/authorize"))
        .and(body_string_contains("client_id=client_test"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "D1",
            "user_code": "ABCD-1234",
            "verification_uri": "https://idp.example.com/device",
            "verification_uri_complete": "https://idp.example.com/device?user_code=ABCD-1234",
            "expires_in": expires_in,
            "interval": interval,
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_login_happy_path_pending_then_tokens() {
    let server = MockServer::start().await;
    mount_authorization(&server, 600, 0).await;

    // First poll: still pending.
    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    // Second poll: user confirmed.
    Mock::given(method("POST"))
        .and(path("/device/token"))
        .and(body_string_contains("device_code=D1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at.1",
            "refresh_token": "rt.1",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let grant = browser_login(&endpoints(&server), CLIENT_ID).await.unwrap();
    assert_eq!(grant.access_token, "at.1");
    assert_eq!(grant.refresh_token.as_deref(), Some("rt.1"));
    assert_eq!(grant.expires_in, Some(3600));
}

#[tokio::test]
async fn test_login_times_out_when_only_pending() {
    let server = MockServer::start().await;
    mount_authorization(&server, 2, 1).await;

    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending"
        })))
        .mount(&server)
        .await;

    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    match result {
        Err(CliError::Timeout(msg)) => assert!(msg.contains("fz auth login")),
        other => panic!("expected Timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_slow_down_raises_interval_by_five_seconds() {
    let server = MockServer::start().await;
    // Deadline of 3s: after the slow_down the next poll waits 5s, so only
    // one more request lands before the loop notices the deadline.
    mount_authorization(&server, 3, 0).await;

    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "slow_down"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "authorization_pending"
        })))
        .mount(&server)
        .await;

    let start = Instant::now();
    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    assert!(matches!(result, Err(CliError::Timeout(_))));

    // The second poll happened a full slow-down increment after the first.
    assert!(start.elapsed().as_secs_f64() >= 5.0);
    let polls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/device/token")
        .count();
    assert_eq!(polls, 2);
}

#[tokio::test]
async fn test_login_access_denied_is_fatal() {
    let server = MockServer::start().await;
    mount_authorization(&server, 600, 0).await;

    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
            "error": "access_denied",
            "error_description": "The user denied the request"
        })))
        .mount(&server)
        .await;

    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    match result {
        Err(CliError::Auth { message, .. }) => assert!(message.contains("denied the request")),
        other => panic!("expected Auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_expired_token_is_fatal() {
    let server = MockServer::start().await;
    mount_authorization(&server, 600, 0).await;

    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "expired_token"
        })))
        .mount(&server)
        .await;

    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    assert!(matches!(result, Err(CliError::Auth { .. })));
}

#[tokio::test]
async fn test_login_unknown_error_is_fatal() {
    let server = MockServer::start().await;
    mount_authorization(&server, 600, 0).await;

    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_client",
            "error_description": "Unknown client"
        })))
        .mount(&server)
        .await;

    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    match result {
        Err(CliError::Auth { message, .. }) => assert!(message.contains("Unknown client")),
        other => panic!("expected Auth error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_login_success_without_token_is_protocol_error() {
    let server = MockServer::start().await;
    mount_authorization(&server, 600, 0).await;

    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "token_type": "Bearer"
        })))
        .mount(&server)
        .await;

    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    match result {
        Err(CliError::General(msg)) => assert!(msg.contains("Unexpected token response")),
        other => panic!("expected General error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_authorization_request_retries_transient_status() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/device/authorize"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "device_code": "D1",
            "user_code": "ABCD-1234",
            "verification_uri": "https://idp.example.com/device",
            "expires_in": 600,
            "interval": 0,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/device/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at.1",
            "refresh_token": "rt.1",
        })))
        .mount(&server)
        .await;

    let grant = browser_login(&endpoints(&server), CLIENT_ID).await.unwrap();
    assert_eq!(grant.access_token, "at.1");
}

#[tokio::test]
async fn test_authorization_request_failure_surfaces_server_message() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/device/authorize"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "Invalid client id"
        })))
        .mount(&server)
        .await;

    let result = browser_login(&endpoints(&server), CLIENT_ID).await;
    match result {
        Err(CliError::Auth { message, .. }) => {
            assert!(message.contains("Device authorization failed"));
            assert!(message.contains("Invalid client id"));
        }
        other => panic!("expected Auth error, got {other:?}"),
    }
}
