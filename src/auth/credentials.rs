//! Credential storage: `<config>/fluidzero/credentials.json`, mode 0600.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{config_dir, CREDENTIALS_FILE};

/// Persisted authentication record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    /// OAuth access token for API authentication.
    pub access_token: String,
    /// OAuth refresh token for obtaining new access tokens.
    pub refresh_token: Option<String>,
    /// Token expiration as a Unix timestamp (seconds since epoch).
    #[serde(default)]
    pub expires_at: i64,
    /// API base URL the tokens were obtained against.
    #[serde(default)]
    pub api_url: String,
    /// OAuth client id used to obtain the tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

/// Reads and writes the single on-disk credentials record.
///
/// The base directory is injectable so tests can point the store at a
/// temporary location.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    credentials_path: PathBuf,
}

impl CredentialStore {
    /// Store rooted at the standard fz config directory.
    ///
    /// Returns `None` if no home directory can be determined.
    pub fn new() -> Option<Self> {
        Some(Self::with_base_dir(&config_dir()?))
    }

    /// Store rooted at an explicit directory.
    pub fn with_base_dir(base: &Path) -> Self {
        Self {
            credentials_path: base.join(CREDENTIALS_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.credentials_path
    }

    /// Load the stored record.
    ///
    /// Missing file, unreadable file, invalid JSON, and records without an
    /// access token all yield `None`; load never fails.
    pub fn load(&self) -> Option<Credentials> {
        let text = fs::read_to_string(&self.credentials_path).ok()?;
        let creds: Credentials = serde_json::from_str(&text).ok()?;
        if creds.access_token.is_empty() {
            return None;
        }
        Some(creds)
    }

    /// Persist the record with owner-only permissions.
    ///
    /// Creates parent directories, writes indented JSON with a trailing
    /// newline, then chmods the file to 0600.
    pub fn save(&self, credentials: &Credentials) -> std::io::Result<()> {
        if let Some(parent) = self.credentials_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut json = serde_json::to_string_pretty(credentials)?;
        json.push('\n');
        fs::write(&self.credentials_path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.credentials_path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Remove the credentials file. Returns whether a file existed.
    pub fn delete(&self) -> bool {
        if self.credentials_path.is_file() {
            fs::remove_file(&self.credentials_path).is_ok()
        } else {
            false
        }
    }
}
