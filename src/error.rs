//! Error taxonomy: typed failures mapped to exit codes and user messages.
//!
//! Lower layers return `CliError` (or sentinel `false` for token refresh);
//! only `main` converts errors into process exit codes.

use thiserror::Error;

use crate::constants::{
    EXIT_AUTH_FAILURE, EXIT_CONFLICT, EXIT_GENERAL_ERROR, EXIT_NETWORK_ERROR, EXIT_NOT_FOUND,
    EXIT_PERMISSION_DENIED, EXIT_RUN_FAILED, EXIT_TIMEOUT,
};

/// Unified error type for the CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// API responded with an error status.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        hint: Option<String>,
    },

    /// Connection, DNS, or timeout failure talking to the network.
    #[error("Network error — {0}")]
    Network(String),

    /// Authentication could not be established or recovered.
    #[error("{message}")]
    Auth {
        message: String,
        hint: Option<String>,
    },

    /// A run reached the `failed` terminal state.
    #[error("Run failed: {0}")]
    RunFailed(String),

    /// A wait loop exceeded its deadline.
    #[error("{0}")]
    Timeout(String),

    /// The user cancelled the operation.
    #[error("Cancelled by user")]
    Cancelled,

    /// Anything else: bad arguments, unexpected payloads, local I/O.
    #[error("{0}")]
    General(String),
}

impl CliError {
    /// Exit code for this error, per the documented taxonomy.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Api { status, .. } => match status {
                401 => EXIT_AUTH_FAILURE,
                403 => EXIT_PERMISSION_DENIED,
                404 => EXIT_NOT_FOUND,
                409 => EXIT_CONFLICT,
                _ => EXIT_GENERAL_ERROR,
            },
            CliError::Network(_) => EXIT_NETWORK_ERROR,
            CliError::Auth { .. } => EXIT_AUTH_FAILURE,
            CliError::RunFailed(_) => EXIT_RUN_FAILED,
            CliError::Timeout(_) => EXIT_TIMEOUT,
            CliError::Cancelled => EXIT_GENERAL_ERROR,
            CliError::General(_) => EXIT_GENERAL_ERROR,
        }
    }

    /// Recovery hint printed under the error message, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            CliError::Api { hint, .. } | CliError::Auth { hint, .. } => hint.as_deref(),
            CliError::Network(_) => Some("Check your network connection and API URL."),
            _ => None,
        }
    }

    /// Auth failure with the standard re-login hint.
    pub fn not_authenticated() -> Self {
        CliError::Auth {
            message: "Not authenticated".to_string(),
            hint: Some("Run `fz auth login` to authenticate.".to_string()),
        }
    }
}

impl From<reqwest::Error> for CliError {
    fn from(err: reqwest::Error) -> Self {
        CliError::Network(err.to_string())
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::General(err.to_string())
    }
}

pub type CliResult<T> = Result<T, CliError>;

/// Pull the `detail` field out of a JSON error body.
///
/// Accepts either a string or an object carrying a `message` field.
fn extract_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(obj) => obj
            .get("message")
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .or_else(|| Some(serde_json::Value::Object(obj.clone()).to_string())),
        _ => None,
    }
}

/// Build a `CliError::Api` from an error response.
///
/// Consumes the response body; the caller has already decided the status is
/// an error (>= 400).
pub async fn api_error(response: reqwest::Response) -> CliError {
    let status = response.status().as_u16();
    let www_auth = response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_lowercase())
        .unwrap_or_default();
    let body = response.text().await.unwrap_or_default();
    api_error_from_parts(status, &www_auth, &body)
}

/// Status + header + body → taxonomy entry. Split out for direct testing.
pub fn api_error_from_parts(status: u16, www_authenticate: &str, body: &str) -> CliError {
    let detail = extract_detail(body);

    let (default_msg, mut hint): (String, Option<String>) = match status {
        401 => (
            "Authentication failed".to_string(),
            Some("Run `fz auth login` to re-authenticate.".to_string()),
        ),
        403 => ("Permission denied".to_string(), None),
        404 => ("Resource not found".to_string(), None),
        409 => ("Conflict".to_string(), None),
        400..=499 => (format!("Client error ({status})"), None),
        _ => (
            format!("Server error ({status})"),
            Some("The API returned an unexpected error. Try again later.".to_string()),
        ),
    };

    let mut message = match status {
        401 | 403 | 404 | 409 => detail.unwrap_or_else(|| format!("{default_msg} ({status})")),
        _ => detail.unwrap_or(default_msg),
    };

    // 401 specializations based on WWW-Authenticate
    if status == 401 {
        if www_authenticate.contains("revoked") {
            message = "Authentication failed — token has been revoked".to_string();
            hint = Some("Create new credentials and run `fz auth login`.".to_string());
        } else if www_authenticate.contains("expired") {
            message = "Authentication failed — token has expired".to_string();
            hint = Some("Run `fz auth login` to re-authenticate.".to_string());
        }
    }

    CliError::Api {
        status,
        message,
        hint,
    }
}
