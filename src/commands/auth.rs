//! Auth commands: login, logout, status, token.

use clap::Subcommand;

use super::Context;
use crate::auth::device_flow::{browser_login, DeviceEndpoints};
use crate::auth::{CredentialStore, TokenManager};
use crate::error::{CliError, CliResult};

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Authenticate via the browser device flow.
    Login,
    /// Remove stored credentials.
    Logout,
    /// Show current authentication status.
    Status,
    /// Print the current access token to stdout (pipe-friendly).
    Token,
}

fn store() -> CliResult<CredentialStore> {
    CredentialStore::new()
        .ok_or_else(|| CliError::General("Could not determine the home directory".to_string()))
}

pub async fn handle(ctx: &Context, cmd: AuthCommand) -> CliResult<()> {
    match cmd {
        AuthCommand::Login => login(ctx).await,
        AuthCommand::Logout => logout(),
        AuthCommand::Status => status(ctx).await,
        AuthCommand::Token => token(ctx).await,
    }
}

async fn login(ctx: &Context) -> CliResult<()> {
    let endpoints = DeviceEndpoints::default();
    let grant = browser_login(&endpoints, &ctx.config.oauth_client_id).await?;

    let expires_in = grant.effective_expires_in();
    let mut mgr = TokenManager::new(ctx.config.api_url.clone(), store()?);
    mgr.set_tokens(
        grant.access_token,
        grant.refresh_token,
        expires_in,
        Some(ctx.config.oauth_client_id.clone()),
    )
    .map_err(|err| CliError::General(format!("Failed to save credentials: {err}")))?;

    let claims = mgr.decode_claims();
    let user = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    eprintln!("Authenticated as {user}");
    if let Some(org) = claims.get("org_id").and_then(|v| v.as_str()) {
        eprintln!("Organization: {org}");
    }
    eprintln!("Credentials saved to {}", store()?.path().display());
    Ok(())
}

fn logout() -> CliResult<()> {
    if store()?.delete() {
        eprintln!("Credentials removed.");
    } else {
        eprintln!("No credentials found.");
    }
    Ok(())
}

async fn status(ctx: &Context) -> CliResult<()> {
    let mut mgr = TokenManager::new(ctx.config.api_url.clone(), store()?);
    if !mgr.load_from_credentials() {
        return Err(CliError::not_authenticated());
    }

    let claims = mgr.decode_claims();
    let get = |key: &str| {
        claims
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("—")
            .to_string()
    };

    let exp = claims.get("exp").and_then(|v| v.as_i64()).unwrap_or(0);
    let remaining = exp - chrono::Utc::now().timestamp();
    let token_status = if remaining > 0 {
        format!("valid (expires in {}m)", remaining / 60)
    } else {
        "expired".to_string()
    };

    eprintln!("User:        {}", get("sub"));
    eprintln!("Org:         {}", get("org_id"));
    eprintln!("Role:        {}", get("role"));
    if let Some(perms) = claims.get("permissions").and_then(|v| v.as_array()) {
        let list: Vec<&str> = perms.iter().filter_map(|p| p.as_str()).collect();
        if !list.is_empty() {
            eprintln!("Permissions: {}", list.join(", "));
        }
    }
    eprintln!("Token:       {token_status}");
    eprintln!("API:         {}", mgr.api_url());
    Ok(())
}

async fn token(ctx: &Context) -> CliResult<()> {
    let mut mgr = TokenManager::new(ctx.config.api_url.clone(), store()?);
    if !mgr.load_from_credentials() {
        return Err(CliError::not_authenticated());
    }
    match mgr.get_access_token().await {
        Some(token) => {
            println!("{token}");
            Ok(())
        }
        None => Err(CliError::Auth {
            message: "Token expired and refresh failed".to_string(),
            hint: Some("Run `fz auth login` to re-authenticate.".to_string()),
        }),
    }
}
