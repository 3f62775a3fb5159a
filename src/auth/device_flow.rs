//! OAuth 2.0 Device Authorization Grant (RFC 8628) for CLI login.
//!
//! 1. Request device + user codes from the identity provider.
//! 2. User confirms in a browser on any device.
//! 3. Poll the token endpoint until authorized, denied, or expired.

use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::Value;

use super::TokenGrant;
use crate::backoff::{is_transient, next_delay, retry_after_secs, MAX_RETRIES};
use crate::constants::{DEVICE_AUTH_URL, DEVICE_TOKEN_URL};
use crate::error::{CliError, CliResult};

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// How much `slow_down` raises the polling interval (RFC 8628 §3.5).
const SLOW_DOWN_INCREMENT_SECS: u64 = 5;

/// Identity-provider endpoints and flow behavior. Injectable so tests can
/// point the flow at a mock server without spawning a browser.
#[derive(Debug, Clone)]
pub struct DeviceEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    pub open_browser: bool,
}

impl Default for DeviceEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: DEVICE_AUTH_URL.to_string(),
            token_url: DEVICE_TOKEN_URL.to_string(),
            open_browser: true,
        }
    }
}

/// Response from the device-authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    #[serde(default)]
    pub verification_uri: Option<String>,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_expires_in() -> u64 {
    300
}

fn default_interval() -> u64 {
    5
}

impl DeviceAuthorization {
    /// URL the user should open: the complete variant (code embedded) when
    /// the provider sent one, else the plain verification URI.
    pub fn open_url(&self) -> Option<&str> {
        self.verification_uri_complete
            .as_deref()
            .filter(|u| !u.is_empty())
            .or(self.verification_uri.as_deref().filter(|u| !u.is_empty()))
    }
}

/// Run the device-authorization flow and return the granted tokens.
///
/// Prints the user code and verification URL to stderr, attempts to open
/// the browser, then polls until the user confirms or the authorization
/// window closes.
pub async fn browser_login(
    endpoints: &DeviceEndpoints,
    oauth_client_id: &str,
) -> CliResult<TokenGrant> {
    if oauth_client_id.is_empty() {
        return Err(CliError::General(
            "OAuth client ID not configured. Set FZ_OAUTH_CLIENT_ID or oauth_client_id in config.toml.".to_string(),
        ));
    }

    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;

    let authorization = request_device_authorization(&client, endpoints, oauth_client_id).await?;

    eprintln!("\nYour confirmation code: {}\n", authorization.user_code);
    match authorization.open_url() {
        Some(url) => {
            eprintln!("Opening browser to confirm...");
            eprintln!("If the browser doesn't open, visit:\n  {url}\n");
            if endpoints.open_browser {
                let _ = open::that(url);
            }
        }
        None => eprintln!("Visit your identity provider and enter the code.\n"),
    }
    eprintln!("Waiting for confirmation...");

    poll_for_tokens(&client, endpoints, oauth_client_id, &authorization).await
}

/// Step 1: request device and user codes, retrying transient failures.
async fn request_device_authorization(
    client: &reqwest::Client,
    endpoints: &DeviceEndpoints,
    oauth_client_id: &str,
) -> CliResult<DeviceAuthorization> {
    let form = [("client_id", oauth_client_id)];

    let mut response = None;
    for attempt in 0..MAX_RETRIES {
        match client
            .post(&endpoints.authorize_url)
            .form(&form)
            .send()
            .await
        {
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

    let response = response.expect("retry loop always yields a response or returns");
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    if status != 200 {
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| {
                body.get("message")
                    .or_else(|| body.get("error"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .unwrap_or(text);
        return Err(CliError::Auth {
            message: format!("Device authorization failed: {message}"),
            hint: None,
        });
    }

    serde_json::from_str::<DeviceAuthorization>(&text).map_err(|err| {
        CliError::General(format!(
            "Device authorization returned an unexpected payload: {err}"
        ))
    })
}

/// Step 3: poll the token endpoint until a terminal outcome.
async fn poll_for_tokens(
    client: &reqwest::Client,
    endpoints: &DeviceEndpoints,
    oauth_client_id: &str,
    authorization: &DeviceAuthorization,
) -> CliResult<TokenGrant> {
    let mut interval = Duration::from_secs(authorization.interval);
    let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);

    while Instant::now() < deadline {
        tokio::time::sleep(interval).await;

        let response = match client
            .post(&endpoints.token_url)
            .form(&[
                ("grant_type", DEVICE_GRANT_TYPE),
                ("device_code", authorization.device_code.as_str()),
                ("client_id", oauth_client_id),
            ])
            .send()
            .await
        {
            Ok(resp) => resp,
            // Network blips during polling are absorbed; try again next tick.
            Err(_) => continue,
        };

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();

        if status == 200 {
            if let Ok(grant) = serde_json::from_str::<TokenGrant>(&text) {
                return Ok(grant);
            }
            return Err(CliError::General(
                "Unexpected token response format. Please report this issue.".to_string(),
            ));
        }

        let body: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
        let error_code = body
            .get("error")
            .or_else(|| body.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        match error_code {
            "authorization_pending" => continue,
            "slow_down" => {
                interval += Duration::from_secs(SLOW_DOWN_INCREMENT_SECS);
                continue;
            }
            "access_denied" | "expired_token" => {
                let description = body
                    .get("error_description")
                    .or_else(|| body.get("message"))
                    .and_then(|v| v.as_str())
                    .unwrap_or(error_code);
                return Err(CliError::Auth {
                    message: format!("Authentication failed: {description}"),
                    hint: None,
                });
            }
            _ if status >= 400 && status != 428 => {
                let description = body
                    .get("error_description")
                    .or_else(|| body.get("message"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .unwrap_or(text);
                return Err(CliError::Auth {
                    message: format!("Authentication failed: {description}"),
                    hint: None,
                });
            }
            _ => continue,
        }
    }

    Err(CliError::Timeout(format!(
        "Authentication timed out after {}s. Try again with `fz auth login`.",
        authorization.expires_in
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_authorization_defaults() {
        let json = r#"{"device_code": "D1", "user_code": "ABCD-1234"}"#;
        let auth: DeviceAuthorization = serde_json::from_str(json).unwrap();
        assert_eq!(auth.expires_in, 300);
        assert_eq!(auth.interval, 5);
        assert!(auth.open_url().is_none());
    }

    #[test]
    fn test_open_url_prefers_complete_uri() {
        let json = r#"{
            "device_code": "D1",
            "user_code": "ABCD-1234",
            "verification_uri": "https://idp/device",
            "verification_uri_complete": "https://idp/device?user_code=ABCD-1234"
        }"#;
        let auth: DeviceAuthorization = serde_json::from_str(json).unwrap();
        assert_eq!(
            auth.open_url(),
            Some("https://idp/device?user_code=ABCD-1234")
        );
    }

    #[test]
    fn test_open_url_falls_back_to_plain_uri() {
        let json = r#"{
            "device_code": "D1",
            "user_code": "ABCD-1234",
            "verification_uri": "https://idp/device",
            "verification_uri_complete": ""
        }"#;
        let auth: DeviceAuthorization = serde_json::from_str(json).unwrap();
        assert_eq!(auth.open_url(), Some("https://idp/device"));
    }

    #[tokio::test]
    async fn test_browser_login_requires_client_id() {
        let endpoints = DeviceEndpoints::default();
        let result = browser_login(&endpoints, "").await;
        match result {
            Err(CliError::General(msg)) => assert!(msg.contains("OAuth client ID")),
            other => panic!("expected General error, got {other:?}"),
        }
    }
}
