//! Machine-to-machine authentication: client_credentials exchange.

use std::time::Duration;

use serde_json::Value;

use super::TokenGrant;
use crate::backoff::{is_transient, next_delay, retry_after_secs, MAX_RETRIES};
use crate::error::{CliError, CliResult};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Exchange M2M client credentials for a short-lived access token.
///
/// Posts `grant_type=client_credentials` to the backend's `/oauth/token`
/// proxy, retrying transient failures up to three attempts with backoff.
/// M2M tokens carry no refresh token; callers re-exchange on expiry.
pub async fn exchange_client_credentials(
    api_url: &str,
    client_id: &str,
    client_secret: &str,
) -> CliResult<TokenGrant> {
    let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
    let url = format!("{api_url}/oauth/token");
    let form = [
        ("grant_type", "client_credentials"),
        ("client_id", client_id),
        ("client_secret", client_secret),
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
                    return Err(CliError::Auth {
                        message: format!("M2M authentication failed: network error: {err}"),
                        hint: None,
                    });
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
                body.get("error_description")
                    .or_else(|| body.get("error"))
                    .and_then(|v| v.as_str())
                    .map(String::from)
            })
            .unwrap_or(text);
        return Err(CliError::Auth {
            message: format!("M2M authentication failed: {message}"),
            hint: None,
        });
    }

    serde_json::from_str::<TokenGrant>(&text).map_err(|_| CliError::Auth {
        message: "M2M authentication failed: response missing access_token".to_string(),
        hint: None,
    })
}
