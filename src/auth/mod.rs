//! Authentication: credential storage, token lifecycle, and login flows.

pub mod credentials;
pub mod device_flow;
pub mod m2m;
pub mod token;

pub use credentials::{CredentialStore, Credentials};
pub use token::{decode_jwt_claims, TokenManager};

use serde::Deserialize;

/// Successful token response from an OAuth grant.
///
/// Unknown fields are ignored; `expires_in` is absent from some provider
/// responses and then inferred from the JWT `exp` claim by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenGrant {
    /// Token lifetime in seconds: the response value when present,
    /// otherwise the JWT `exp` claim, otherwise a 300 second fallback.
    pub fn effective_expires_in(&self) -> i64 {
        if let Some(expires_in) = self.expires_in {
            return expires_in;
        }
        let now = chrono::Utc::now().timestamp();
        decode_jwt_claims(&self.access_token)
            .get("exp")
            .and_then(|v| v.as_i64())
            .map(|exp| (exp - now).max(0))
            .unwrap_or(300)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    #[test]
    fn test_effective_expires_in_prefers_response_value() {
        let grant = TokenGrant {
            access_token: "opaque".to_string(),
            refresh_token: None,
            expires_in: Some(1800),
        };
        assert_eq!(grant.effective_expires_in(), 1800);
    }

    #[test]
    fn test_effective_expires_in_from_jwt_exp() {
        let exp = chrono::Utc::now().timestamp() + 3600;
        let token = format!(
            "{}.{}.{}",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#)),
            URL_SAFE_NO_PAD.encode("sig")
        );
        let grant = TokenGrant {
            access_token: token,
            refresh_token: None,
            expires_in: None,
        };
        let effective = grant.effective_expires_in();
        assert!((3590..=3600).contains(&effective), "got {effective}");
    }

    #[test]
    fn test_effective_expires_in_fallback() {
        let grant = TokenGrant {
            access_token: "not-a-jwt".to_string(),
            refresh_token: None,
            expires_in: None,
        };
        assert_eq!(grant.effective_expires_in(), 300);
    }
}
