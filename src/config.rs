//! Configuration resolution.
//!
//! Layering, least to most specific: hardcoded defaults, the global
//! `config.toml` under the fz config directory, `.fluidzero.toml` in the
//! working directory, environment variables, and finally command-line flags
//! (applied by the command layer). Missing or invalid TOML files are
//! treated as empty.

use std::path::Path;

use toml::Table;

use crate::constants::{
    config_dir, DEFAULT_API_URL, DEFAULT_AUTHKIT_SUBDOMAIN, DEFAULT_OAUTH_CLIENT_ID,
    GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE, RUN_POLL_INTERVAL, RUN_TIMEOUT, UPLOAD_CONCURRENCY,
    UPLOAD_RETRY_ATTEMPTS,
};

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct FzConfig {
    pub api_url: String,
    pub project: Option<String>,
    pub output: String,
    pub authkit_subdomain: String,
    pub oauth_client_id: String,

    // Upload
    pub upload_concurrency: usize,
    pub upload_retry_attempts: usize,

    // Runs
    pub run_poll_interval: u64,
    pub run_timeout: u64,
}

impl Default for FzConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            project: None,
            output: "table".to_string(),
            authkit_subdomain: DEFAULT_AUTHKIT_SUBDOMAIN.to_string(),
            oauth_client_id: DEFAULT_OAUTH_CLIENT_ID.to_string(),
            upload_concurrency: UPLOAD_CONCURRENCY,
            upload_retry_attempts: UPLOAD_RETRY_ATTEMPTS,
            run_poll_interval: RUN_POLL_INTERVAL,
            run_timeout: RUN_TIMEOUT,
        }
    }
}

/// Read a TOML file, returning an empty table if missing or invalid.
fn read_toml(path: &Path) -> Table {
    let Ok(text) = std::fs::read_to_string(path) else {
        return Table::new();
    };
    text.parse::<Table>().unwrap_or_default()
}

fn get_str(table: &Table, key: &str) -> Option<String> {
    table.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn get_int(table: &Table, key: &str) -> Option<i64> {
    table.get(key).and_then(|v| v.as_integer())
}

fn section<'a>(table: &'a Table, name: &str) -> Option<&'a Table> {
    table.get(name).and_then(|v| v.as_table())
}

/// Merge a section of the local table over the same section of the global
/// table, key by key.
fn merged_section(global: &Table, local: &Table, name: &str) -> Table {
    let mut out = section(global, name).cloned().unwrap_or_default();
    if let Some(over) = section(local, name) {
        for (k, v) in over {
            out.insert(k.clone(), v.clone());
        }
    }
    out
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl FzConfig {
    /// Load config from the standard file locations and the environment.
    pub fn load() -> Self {
        let global = config_dir()
            .map(|d| read_toml(&d.join(GLOBAL_CONFIG_FILE)))
            .unwrap_or_default();
        let local = std::env::current_dir()
            .map(|d| read_toml(&d.join(LOCAL_CONFIG_FILE)))
            .unwrap_or_default();

        let mut cfg = Self::from_tables(&global, &local);
        cfg.apply_env();
        cfg
    }

    /// Resolve from parsed TOML tables only (no environment). Split out so
    /// tests can drive it with literal tables.
    pub fn from_tables(global: &Table, local: &Table) -> Self {
        let mut cfg = Self::default();

        let mut defaults = merged_section(global, local, "defaults");
        // A bare top-level `project` key in the local file is shorthand for
        // [defaults] project.
        if let Some(project) = get_str(local, "project") {
            defaults.insert("project".to_string(), toml::Value::String(project));
        }
        let upload = merged_section(global, local, "upload");
        let runs = merged_section(global, local, "runs");

        if let Some(v) = get_str(&defaults, "api_url") {
            cfg.api_url = v;
        }
        if let Some(v) = get_str(&defaults, "project") {
            cfg.project = Some(v);
        }
        if let Some(v) = get_str(&defaults, "output") {
            cfg.output = v;
        }

        // AuthKit / OAuth settings live at the top level of the global file.
        if let Some(v) = get_str(global, "authkit_subdomain") {
            cfg.authkit_subdomain = v;
        }
        if let Some(v) = get_str(global, "oauth_client_id") {
            cfg.oauth_client_id = v;
        }

        if let Some(v) = get_int(&upload, "concurrency") {
            cfg.upload_concurrency = v.max(1) as usize;
        }
        if let Some(v) = get_int(&upload, "retry_attempts") {
            cfg.upload_retry_attempts = v.max(1) as usize;
        }

        if let Some(v) = get_int(&runs, "poll_interval") {
            cfg.run_poll_interval = v.max(1) as u64;
        }
        if let Some(v) = get_int(&runs, "timeout") {
            cfg.run_timeout = v.max(1) as u64;
        }

        cfg
    }

    /// Apply environment-variable overrides on top of file values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_var("FZ_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = env_var("FZ_PROJECT_ID") {
            self.project = Some(v);
        }
        if let Some(v) = env_var("FZ_OUTPUT") {
            self.output = v;
        }
        if let Some(v) = env_var("FZ_AUTHKIT_SUBDOMAIN") {
            self.authkit_subdomain = v;
        }
        if let Some(v) = env_var("FZ_OAUTH_CLIENT_ID") {
            self.oauth_client_id = v;
        }
    }
}
