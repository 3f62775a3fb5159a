//! Exit codes, service defaults, and filesystem paths for the fz CLI.

use std::path::PathBuf;

// ── Exit codes ──────────────────────────────────────────────────────────────

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_GENERAL_ERROR: i32 = 1;
pub const EXIT_AUTH_FAILURE: i32 = 2;
pub const EXIT_PERMISSION_DENIED: i32 = 3;
pub const EXIT_NOT_FOUND: i32 = 4;
pub const EXIT_CONFLICT: i32 = 5;
pub const EXIT_RUN_FAILED: i32 = 6;
pub const EXIT_TIMEOUT: i32 = 7;
pub const EXIT_NETWORK_ERROR: i32 = 10;

// ── API defaults ────────────────────────────────────────────────────────────

pub const DEFAULT_API_URL: &str = "https://api-staging.fluidzero.ai";

// ── OAuth / AuthKit (public PKCE values, not secrets) ───────────────────────

pub const DEFAULT_AUTHKIT_SUBDOMAIN: &str = "euphoric-grape-60-staging";
pub const DEFAULT_OAUTH_CLIENT_ID: &str = "client_01KGA8ECKMDH8GWPZR00QGPTBZ";

/// WorkOS User Management endpoints (first-party CLI auth).
pub const DEVICE_AUTH_URL: &str = "https://api.workos.com/user_management/authorize/device";
pub const DEVICE_TOKEN_URL: &str = "https://api.workos.com/user_management/authenticate";

// ── Upload defaults ─────────────────────────────────────────────────────────

pub const UPLOAD_CONCURRENCY: usize = 5;
pub const UPLOAD_RETRY_ATTEMPTS: usize = 3;

// ── Run defaults ────────────────────────────────────────────────────────────

pub const RUN_POLL_INTERVAL: u64 = 2; // seconds
pub const RUN_TIMEOUT: u64 = 600; // seconds

// ── File paths ──────────────────────────────────────────────────────────────

const CONFIG_DIR_NAME: &str = "fluidzero";
pub const CREDENTIALS_FILE: &str = "credentials.json";
pub const GLOBAL_CONFIG_FILE: &str = "config.toml";
pub const LOCAL_CONFIG_FILE: &str = ".fluidzero.toml";

/// Resolve the fz configuration directory.
///
/// `$XDG_CONFIG_HOME/fluidzero` when the variable is set, otherwise
/// `~/.config/fluidzero`. Returns `None` only when no home directory can
/// be determined.
pub fn config_dir() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::home_dir()?.join(".config"),
    };
    Some(base.join(CONFIG_DIR_NAME))
}
