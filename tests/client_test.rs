//! Integration tests for the authenticated HTTP engine.
//!
//! A mock API server exercises transient retry, the one-shot 401 replay,
//! the revoked-token short-circuit, and both auth modes.

use fz::auth::{CredentialStore, Credentials};
use fz::client::FzClient;
use fz::error::CliError;
use serial_test::serial;
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn valid_credentials(api_url: &str) -> Credentials {
    Credentials {
        access_token: "at.1".to_string(),
        refresh_token: Some("rt.1".to_string()),
        expires_at: chrono::Utc::now().timestamp() + 3600,
        api_url: api_url.to_string(),
        client_id: None,
    }
}

fn expired_credentials(api_url: &str) -> Credentials {
    Credentials {
        expires_at: chrono::Utc::now().timestamp() - 10,
        ..valid_credentials(api_url)
    }
}

/// Client backed by a temp-dir credential store primed with `creds`.
fn client_with(creds: Option<&Credentials>, api_url: &str) -> (TempDir, FzClient) {
    let dir = TempDir::new().unwrap();
    let store = CredentialStore::with_base_dir(dir.path());
    if let Some(creds) = creds {
        store.save(creds).unwrap();
    }
    let client = FzClient::with_store(api_url, false, store).unwrap();
    (dir, client)
}

fn clear_m2m_env() {
    std::env::remove_var("FZ_CLIENT_ID");
    std::env::remove_var("FZ_CLIENT_SECRET");
}

#[tokio::test]
#[serial]
async fn test_get_sends_bearer_header() {
    clear_m2m_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .and(header("authorization", "Bearer at.1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let response = client.get("/api/projects").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_unauthenticated_without_credentials() {
    clear_m2m_env();
    let (_dir, client) = client_with(None, "http://127.0.0.1:1");

    let result = client.get("/api/projects").await;
    match result {
        Err(err @ CliError::Auth { .. }) => {
            assert_eq!(err.exit_code(), 2);
            assert!(err.hint().unwrap().contains("fz auth login"));
        }
        other => panic!("expected Auth error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_transient_status_is_retried() {
    clear_m2m_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/runs/r-1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/runs/r-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "r-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let response = client.get("/api/runs/r-1").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
#[serial]
async fn test_transient_retries_are_bounded() {
    clear_m2m_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/runs/r-1"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let result = client.get("/api/runs/r-1").await;
    match result {
        Err(CliError::Api { status, .. }) => assert_eq!(status, 503),
        other => panic!("expected Api error, got {other:?}"),
    }
    // Three attempts, no more.
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
#[serial]
async fn test_401_refresh_and_replay_once() {
    clear_m2m_env();
    let server = MockServer::start().await;

    // Stale bearer is rejected once.
    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .and(header("authorization", "Bearer at.1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    // Refresh rotates the token.
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at.2",
            "refresh_token": "rt.2",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;
    // Replay with the fresh token succeeds.
    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .and(header("authorization", "Bearer at.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let response = client.get("/api/projects").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_401_replay_happens_at_most_once() {
    clear_m2m_env();
    let server = MockServer::start().await;

    // Every API call is rejected, even with the refreshed token.
    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at.2",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let result = client.get("/api/projects").await;
    match result {
        Err(err @ CliError::Api { status: 401, .. }) => assert_eq!(err.exit_code(), 2),
        other => panic!("expected 401 Api error, got {other:?}"),
    }

    // Original request + exactly one replay.
    let api_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/api/projects")
        .count();
    assert_eq!(api_calls, 2);
}

#[tokio::test]
#[serial]
async fn test_revoked_token_is_not_replayed() {
    clear_m2m_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .respond_with(
            ResponseTemplate::new(401)
                .insert_header("www-authenticate", r#"Bearer error="revoked""#),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let result = client.get("/api/projects").await;
    match result {
        Err(err @ CliError::Api { .. }) => {
            assert_eq!(err.exit_code(), 2);
            assert!(err.to_string().contains("revoked"));
            assert!(err.hint().unwrap().contains("new credentials"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }

    // No refresh attempt was made.
    let refresh_calls = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/oauth/token")
        .count();
    assert_eq!(refresh_calls, 0);
}

#[tokio::test]
#[serial]
async fn test_error_detail_surfaces_in_message() {
    clear_m2m_env();
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/projects/p-x"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "detail": "Project p-x does not exist"
        })))
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&valid_credentials(&server.uri())), &server.uri());
    let result = client.get("/api/projects/p-x").await;
    match result {
        Err(err @ CliError::Api { status: 404, .. }) => {
            assert_eq!(err.exit_code(), 4);
            assert!(err.to_string().contains("does not exist"));
        }
        other => panic!("expected 404 Api error, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn test_expired_token_refreshed_before_first_request() {
    clear_m2m_env();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at.2",
            "refresh_token": "rt.2",
            "expires_in": 1800
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .and(header("authorization", "Bearer at.2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let (_dir, client) = client_with(Some(&expired_credentials(&server.uri())), &server.uri());
    let response = client.get("/api/projects").await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_m2m_exchange_from_env() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("client_id=m2m-id"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "at.m2m",
            "expires_in": 600
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/projects"))
        .and(header("authorization", "Bearer at.m2m"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    std::env::set_var("FZ_CLIENT_ID", "m2m-id");
    std::env::set_var("FZ_CLIENT_SECRET", "m2m-secret");

    // No on-disk credentials: M2M env vars carry the whole exchange.
    let (_dir, client) = client_with(None, &server.uri());
    let result = client.get("/api/projects").await;

    clear_m2m_env();
    let response = result.unwrap();
    assert_eq!(response.status().as_u16(), 200);
}

#[tokio::test]
#[serial]
async fn test_network_error_maps_to_exit_10() {
    clear_m2m_env();
    let (_dir, client) = client_with(
        Some(&valid_credentials("http://127.0.0.1:1")),
        "http://127.0.0.1:1",
    );
    let result = client.get("/api/projects").await;
    match result {
        Err(err @ CliError::Network(_)) => assert_eq!(err.exit_code(), 10),
        other => panic!("expected Network error, got {other:?}"),
    }
}
