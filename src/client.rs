//! Authenticated HTTP engine with transient retry and 401 replay.
//!
//! Two auth modes:
//! - **Browser (device flow)**: tokens from `fz auth login`, refreshed via
//!   the backend's `/oauth/token` proxy.
//! - **M2M (env vars)**: `FZ_CLIENT_ID` + `FZ_CLIENT_SECRET` exchanged for a
//!   short-lived token, re-exchanged automatically on expiry (M2M tokens
//!   carry no refresh token).

use reqwest::Method;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::auth::m2m::exchange_client_credentials;
use crate::auth::{CredentialStore, TokenManager};
use crate::backoff::{is_transient, next_delay, retry_after_secs, MAX_RETRIES};
use crate::error::{api_error, CliError, CliResult};

const API_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(60);

/// Fallback M2M token lifetime when the exchange response omits one.
const M2M_DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Clone)]
enum AuthMode {
    Browser,
    M2m {
        client_id: String,
        client_secret: String,
    },
}

#[derive(Debug)]
struct AuthState {
    token_mgr: TokenManager,
    mode: Option<AuthMode>,
}

/// Sync-feeling HTTP client with automatic token management.
///
/// All service calls go through [`FzClient::request`]; the engine resolves
/// auth lazily on first use, retries transient failures, and replays a
/// request exactly once after recovering from a 401.
#[derive(Debug)]
pub struct FzClient {
    api_url: String,
    verbose: bool,
    http: reqwest::Client,
    state: Mutex<AuthState>,
}

impl FzClient {
    /// Client rooted at the standard credential store.
    pub fn new(api_url: &str, verbose: bool) -> CliResult<Self> {
        let store = CredentialStore::new().ok_or_else(|| {
            CliError::General("Could not determine the home directory".to_string())
        })?;
        Self::with_store(api_url, verbose, store)
    }

    /// Client with an explicit credential store (tests use a temp dir).
    pub fn with_store(api_url: &str, verbose: bool, store: CredentialStore) -> CliResult<Self> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder().timeout(API_TIMEOUT).build()?;
        Ok(Self {
            state: Mutex::new(AuthState {
                token_mgr: TokenManager::new(api_url.clone(), store),
                mode: None,
            }),
            api_url,
            verbose,
            http,
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Resolve credentials on first use.
    ///
    /// Env-var M2M credentials win over the on-disk browser-flow record.
    async fn resolve_auth(&self, state: &mut AuthState) -> CliResult<()> {
        if state.mode.is_some() {
            return Ok(());
        }

        let m2m_id = std::env::var("FZ_CLIENT_ID").ok().filter(|v| !v.is_empty());
        let m2m_secret = std::env::var("FZ_CLIENT_SECRET")
            .ok()
            .filter(|v| !v.is_empty());

        if let (Some(client_id), Some(client_secret)) = (m2m_id, m2m_secret) {
            self.exchange_m2m(state, &client_id, &client_secret).await?;
            state.mode = Some(AuthMode::M2m {
                client_id,
                client_secret,
            });
            return Ok(());
        }

        if !state.token_mgr.load_from_credentials() {
            return Err(CliError::not_authenticated());
        }
        state.mode = Some(AuthMode::Browser);
        Ok(())
    }

    async fn exchange_m2m(
        &self,
        state: &mut AuthState,
        client_id: &str,
        client_secret: &str,
    ) -> CliResult<()> {
        let grant = exchange_client_credentials(&self.api_url, client_id, client_secret).await?;
        let expires_in = grant.expires_in.unwrap_or(M2M_DEFAULT_EXPIRES_IN);
        state
            .token_mgr
            .set_tokens(grant.access_token, None, expires_in, None)
            .map_err(|err| CliError::General(format!("Failed to save credentials: {err}")))?;
        Ok(())
    }

    /// Obtain a bearer token, re-exchanging M2M credentials once if the
    /// manager comes up empty.
    async fn bearer_token(&self, state: &mut AuthState) -> CliResult<String> {
        if let Some(token) = state.token_mgr.get_access_token().await {
            return Ok(token);
        }

        if let Some(AuthMode::M2m {
            client_id,
            client_secret,
        }) = state.mode.clone()
        {
            self.exchange_m2m(state, &client_id, &client_secret).await?;
            if let Some(token) = state.token_mgr.get_access_token().await {
                return Ok(token);
            }
        }

        Err(CliError::Auth {
            message: "No valid access token".to_string(),
            hint: Some("Run `fz auth login` to re-authenticate.".to_string()),
        })
    }

    /// Attempt to recover auth after a 401: refresh for the browser flow,
    /// re-exchange for M2M.
    async fn recover_auth(&self, state: &mut AuthState) -> bool {
        match state.mode.clone() {
            Some(AuthMode::M2m {
                client_id,
                client_secret,
            }) => self
                .exchange_m2m(state, &client_id, &client_secret)
                .await
                .is_ok(),
            _ => state.token_mgr.refresh().await,
        }
    }

    /// Make an authenticated API request.
    ///
    /// Transient failures retry up to three attempts with backoff; a 401 is
    /// replayed at most once after auth recovery, unless the server reports
    /// the token as revoked. Any remaining error status maps into the
    /// error taxonomy.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        json: Option<&Value>,
        params: Option<&[(&str, String)]>,
    ) -> CliResult<reqwest::Response> {
        let url = format!("{}{}", self.api_url, path);
        if self.verbose {
            eprintln!("  {method} {url}");
        }

        // Auth state is touched under the lock; the send itself runs
        // without it so background part acknowledgements don't serialize.
        let token = {
            let mut state = self.state.lock().await;
            self.resolve_auth(&mut state).await?;
            self.bearer_token(&mut state).await?
        };

        let build = |token: &str| {
            let mut builder = self.http.request(method.clone(), url.as_str()).bearer_auth(token);
            if let Some(body) = json {
                builder = builder.json(body);
            }
            if let Some(params) = params {
                builder = builder.query(params);
            }
            builder
        };

        // Send with transient retry.
        let mut response = None;
        for attempt in 0..MAX_RETRIES {
            match build(&token).send().await {
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
                        return Err(CliError::Network(err.to_string()));
                    }
                    tokio::time::sleep(next_delay(attempt, None)).await;
                }
            }
        }
        let mut response = response.expect("retry loop always yields a response or returns");

        // One-shot replay on 401: refresh or re-exchange, then resend with
        // fresh headers. A revoked token is never replayed.
        if response.status().as_u16() == 401 {
            let revoked = response
                .headers()
                .get("www-authenticate")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_lowercase().contains("revoked"))
                .unwrap_or(false);

            if !revoked {
                let fresh = {
                    let mut state = self.state.lock().await;
                    if self.recover_auth(&mut state).await {
                        Some(self.bearer_token(&mut state).await?)
                    } else {
                        None
                    }
                };
                if let Some(token) = fresh {
                    response = build(&token)
                        .send()
                        .await
                        .map_err(|err| CliError::Network(err.to_string()))?;
                }
            }
        }

        if response.status().as_u16() >= 400 {
            return Err(api_error(response).await);
        }
        Ok(response)
    }

    // ── Convenience wrappers ────────────────────────────────────────────

    pub async fn get(&self, path: &str) -> CliResult<reqwest::Response> {
        self.request(Method::GET, path, None, None).await
    }

    pub async fn get_query(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> CliResult<reqwest::Response> {
        self.request(Method::GET, path, None, Some(params)).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> CliResult<reqwest::Response> {
        self.request(Method::POST, path, Some(body), None).await
    }

    pub async fn post_empty(&self, path: &str) -> CliResult<reqwest::Response> {
        self.request(Method::POST, path, None, None).await
    }

    pub async fn put_json(&self, path: &str, body: &Value) -> CliResult<reqwest::Response> {
        self.request(Method::PUT, path, Some(body), None).await
    }

    pub async fn delete(&self, path: &str) -> CliResult<reqwest::Response> {
        self.request(Method::DELETE, path, None, None).await
    }
}
