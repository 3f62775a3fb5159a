//! Token lifecycle management: load, expiry check, refresh, decode.

use serde_json::{Map, Value};
use tracing::warn;

use super::credentials::{CredentialStore, Credentials};
use crate::backoff::{is_transient, next_delay, retry_after_secs, MAX_RETRIES};

/// Seconds of clock skew tolerated before a token counts as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Fallback token lifetime when neither the response nor the JWT carries one.
const DEFAULT_REFRESH_LIFETIME_SECS: i64 = 300;

const REFRESH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Decode JWT claims without signature verification.
///
/// Splits on `.`, base64url-decodes the payload segment, and parses it as a
/// JSON object. Any failure yields an empty map. Used only for display and
/// expiry inference, never for trust decisions.
pub fn decode_jwt_claims(token: &str) -> Map<String, Value> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next()) {
        (Some(_), Some(payload)) => payload,
        _ => return Map::new(),
    };
    let Ok(bytes) = URL_SAFE_NO_PAD.decode(payload) else {
        return Map::new();
    };
    match serde_json::from_slice::<Value>(&bytes) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Manages access/refresh token lifecycle.
///
/// Refresh goes through the backend's `/oauth/token` proxy with
/// `source=device` so the proxy routes device-flow tokens to the right
/// identity-provider endpoint. Every successful mutation rewrites the
/// credential store.
#[derive(Debug)]
pub struct TokenManager {
    api_url: String,
    store: CredentialStore,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at: i64,
    client_id: Option<String>,
}

impl TokenManager {
    pub fn new(api_url: impl Into<String>, store: CredentialStore) -> Self {
        Self {
            api_url: api_url.into(),
            store,
            access_token: None,
            refresh_token: None,
            expires_at: 0,
            client_id: None,
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn has_tokens(&self) -> bool {
        self.access_token.is_some()
    }

    /// Populate state from the credential store. Returns whether a record
    /// was found. A stored `api_url` takes over as the active API URL.
    pub fn load_from_credentials(&mut self) -> bool {
        let Some(creds) = self.store.load() else {
            return false;
        };
        self.access_token = Some(creds.access_token);
        self.refresh_token = creds.refresh_token;
        self.expires_at = creds.expires_at;
        self.client_id = creds.client_id;
        if !creds.api_url.is_empty() {
            self.api_url = creds.api_url;
        }
        true
    }

    /// Install tokens after a fresh login and persist them.
    pub fn set_tokens(
        &mut self,
        access_token: String,
        refresh_token: Option<String>,
        expires_in: i64,
        client_id: Option<String>,
    ) -> std::io::Result<()> {
        self.access_token = Some(access_token);
        self.refresh_token = refresh_token;
        self.expires_at = now() + expires_in;
        if client_id.is_some() {
            self.client_id = client_id;
        }
        self.persist()
    }

    /// Whether the access token is expired or expires within the skew window.
    pub fn is_expired(&self) -> bool {
        self.expires_at - EXPIRY_SKEW_SECS < now()
    }

    /// Return a valid access token, refreshing transparently if needed.
    ///
    /// `None` when there is no token, or the token is expired and cannot be
    /// refreshed.
    pub async fn get_access_token(&mut self) -> Option<String> {
        self.access_token.as_ref()?;
        if self.is_expired() {
            if self.refresh_token.is_some() {
                if !self.refresh().await {
                    return None;
                }
            } else {
                return None;
            }
        }
        self.access_token.clone()
    }

    /// Refresh the access token via the backend's `/oauth/token` proxy.
    ///
    /// Transient failures (429/502/503/504, network errors) are retried up
    /// to three attempts with backoff. Returns `true` on success; all
    /// failure paths log a warning and return `false`.
    pub async fn refresh(&mut self) -> bool {
        let Some(refresh_token) = self.refresh_token.clone() else {
            return false;
        };

        let client = match reqwest::Client::builder().timeout(REFRESH_TIMEOUT).build() {
            Ok(c) => c,
            Err(err) => {
                warn!("token refresh failed: could not build HTTP client: {err}");
                return false;
            }
        };
        let url = format!("{}/oauth/token", self.api_url);
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("source", "device"),
        ];

        let mut response = None;
        for attempt in 0..MAX_RETRIES {
            match client.post(&url).form(&form).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if is_transient(status) && attempt + 1 < MAX_RETRIES {
                        let delay = next_delay(attempt, retry_after_secs(resp.headers()));
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    response = Some(resp);
                    break;
                }
                Err(err) => {
                    if attempt + 1 == MAX_RETRIES {
                        warn!("token refresh failed (network): {err}");
                        return false;
                    }
                    tokio::time::sleep(next_delay(attempt, None)).await;
                }
            }
        }

        let Some(response) = response else {
            return false;
        };
        if response.status().as_u16() != 200 {
            warn!(
                "token refresh failed (HTTP {}); run `fz auth login` if requests fail",
                response.status().as_u16()
            );
            return false;
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!("token refresh failed: invalid response body: {err}");
                return false;
            }
        };
        let Some(access_token) = body.get("access_token").and_then(|v| v.as_str()) else {
            warn!("token refresh failed: response missing access_token");
            return false;
        };

        self.access_token = Some(access_token.to_string());
        // The identity provider rotates the refresh token on each use.
        if let Some(rotated) = body.get("refresh_token").and_then(|v| v.as_str()) {
            self.refresh_token = Some(rotated.to_string());
        }
        // Derive expiry: prefer expires_in, else the JWT exp claim.
        self.expires_at = match body.get("expires_in").and_then(|v| v.as_i64()) {
            Some(expires_in) => now() + expires_in,
            None => decode_jwt_claims(access_token)
                .get("exp")
                .and_then(|v| v.as_i64())
                .unwrap_or_else(|| now() + DEFAULT_REFRESH_LIFETIME_SECS),
        };

        if let Err(err) = self.persist() {
            warn!("failed to persist refreshed credentials: {err}");
        }
        true
    }

    /// Decode the current access token's claims (unverified). Empty map if
    /// there is no token or it does not parse.
    pub fn decode_claims(&self) -> Map<String, Value> {
        match &self.access_token {
            Some(token) => decode_jwt_claims(token),
            None => Map::new(),
        }
    }

    fn persist(&self) -> std::io::Result<()> {
        let Some(access_token) = &self.access_token else {
            return Ok(());
        };
        self.store.save(&Credentials {
            access_token: access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
            api_url: self.api_url.clone(),
            client_id: self.client_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_manager() -> (TempDir, TokenManager) {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::with_base_dir(dir.path());
        let mgr = TokenManager::new("https://api.example.com", store);
        (dir, mgr)
    }

    fn encode_jwt(claims: &str) -> String {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;
        format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(claims),
            URL_SAFE_NO_PAD.encode("signature")
        )
    }

    #[test]
    fn test_load_from_empty_store() {
        let (_dir, mut mgr) = test_manager();
        assert!(!mgr.load_from_credentials());
        assert!(!mgr.has_tokens());
    }

    #[test]
    fn test_set_tokens_persists_and_reloads() {
        let (dir, mut mgr) = test_manager();
        mgr.set_tokens(
            "at.1".to_string(),
            Some("rt.1".to_string()),
            3600,
            Some("client_x".to_string()),
        )
        .unwrap();
        assert!(!mgr.is_expired());

        let store = CredentialStore::with_base_dir(dir.path());
        let mut reloaded = TokenManager::new("https://other.example.com", store);
        assert!(reloaded.load_from_credentials());
        assert!(reloaded.has_tokens());
        // The persisted api_url wins over the constructor argument.
        assert_eq!(reloaded.api_url(), "https://api.example.com");
    }

    #[test]
    fn test_is_expired_respects_skew() {
        let (_dir, mut mgr) = test_manager();
        mgr.access_token = Some("at".to_string());

        mgr.expires_at = now() + 120;
        assert!(!mgr.is_expired());

        // Within the 60 second skew window counts as expired.
        mgr.expires_at = now() + 30;
        assert!(mgr.is_expired());

        mgr.expires_at = now() - 10;
        assert!(mgr.is_expired());
    }

    #[tokio::test]
    async fn test_get_access_token_without_token() {
        let (_dir, mut mgr) = test_manager();
        assert!(mgr.get_access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_get_access_token_expired_without_refresh_token() {
        let (_dir, mut mgr) = test_manager();
        mgr.access_token = Some("at.stale".to_string());
        mgr.expires_at = now() - 100;
        assert!(mgr.get_access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_get_access_token_valid() {
        let (_dir, mut mgr) = test_manager();
        mgr.access_token = Some("at.fresh".to_string());
        mgr.expires_at = now() + 3600;
        assert_eq!(mgr.get_access_token().await.as_deref(), Some("at.fresh"));
    }

    #[test]
    fn test_decode_jwt_claims_valid() {
        let token = encode_jwt(r#"{"sub":"user-1","exp":1900000000,"org_id":"org-9"}"#);
        let claims = decode_jwt_claims(&token);
        assert_eq!(claims.get("sub").unwrap().as_str(), Some("user-1"));
        assert_eq!(claims.get("exp").unwrap().as_i64(), Some(1_900_000_000));
    }

    #[test]
    fn test_decode_jwt_claims_garbage() {
        assert!(decode_jwt_claims("not-a-jwt").is_empty());
        assert!(decode_jwt_claims("a.!!!.c").is_empty());
        assert!(decode_jwt_claims("").is_empty());
    }

    #[test]
    fn test_decode_claims_without_token() {
        let (_dir, mgr) = test_manager();
        assert!(mgr.decode_claims().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_without_refresh_token() {
        let (_dir, mut mgr) = test_manager();
        mgr.access_token = Some("at".to_string());
        assert!(!mgr.refresh().await);
    }
}
