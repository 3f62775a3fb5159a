//! Command-line surface: argument definitions and dispatch.

pub mod auth;
pub mod batch;
pub mod documents;
pub mod projects;
pub mod runs;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use crate::client::FzClient;
use crate::config::FzConfig;
use crate::error::{CliError, CliResult};
use crate::output::OutputFormat;

/// FluidZero CLI — manage projects, documents, and extraction runs.
#[derive(Debug, Parser)]
#[command(name = "fz", version, about)]
pub struct Cli {
    /// API base URL.
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Default project ID.
    #[arg(short = 'p', long, global = true)]
    pub project: Option<String>,

    /// Output format: table, json, jsonl, or csv.
    #[arg(short = 'o', long, global = true)]
    pub output: Option<String>,

    /// Suppress non-essential output.
    #[arg(short, long, global = true, env = "FZ_QUIET")]
    pub quiet: bool,

    /// Show HTTP requests.
    #[arg(short, long, global = true, env = "FZ_VERBOSE")]
    pub verbose: bool,

    /// Disable colored output and progress decoration.
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage authentication.
    #[command(subcommand)]
    Auth(auth::AuthCommand),

    /// Manage projects.
    #[command(subcommand)]
    Projects(projects::ProjectsCommand),

    /// Manage documents within a project.
    #[command(subcommand)]
    Documents(documents::DocumentsCommand),

    /// Manage extraction runs.
    #[command(subcommand)]
    Runs(runs::RunsCommand),

    /// Upload files, create a run, and optionally wait for results.
    Run(batch::RunArgs),

    /// Batch-process a directory: upload, run, collect results.
    Batch(batch::BatchArgs),
}

/// Resolved invocation state shared by all command handlers.
pub struct Context {
    pub config: FzConfig,
    pub project: Option<String>,
    pub format: OutputFormat,
    pub quiet: bool,
    pub client: Arc<FzClient>,
}

impl Context {
    /// Resolve the project ID: explicit argument, then flag/env/config.
    pub fn resolve_project(&self, explicit: Option<&str>) -> CliResult<String> {
        explicit
            .map(String::from)
            .or_else(|| self.project.clone())
            .ok_or_else(|| {
                CliError::General(
                    "No project specified. Pass -p/--project or set FZ_PROJECT_ID / defaults.project in config.".to_string(),
                )
            })
    }
}

/// Resolve configuration, build the client, and dispatch the command.
pub async fn run(cli: Cli) -> CliResult<()> {
    // The flag and the conventional env var mean the same thing; the
    // progress layer only checks the variable.
    if cli.no_color {
        std::env::set_var("NO_COLOR", "1");
    }

    let mut config = FzConfig::load();

    // CLI flags are the most specific layer.
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }
    if let Some(project) = cli.project {
        config.project = Some(project);
    }
    if let Some(output) = cli.output {
        config.output = output;
    }

    let format = OutputFormat::parse(&config.output).ok_or_else(|| {
        CliError::General(format!(
            "Invalid output format '{}'. Expected table, json, jsonl, or csv.",
            config.output
        ))
    })?;

    let client = Arc::new(FzClient::new(&config.api_url, cli.verbose)?);
    let ctx = Context {
        project: config.project.clone(),
        format,
        quiet: cli.quiet,
        config,
        client,
    };

    match cli.command {
        Command::Auth(cmd) => auth::handle(&ctx, cmd).await,
        Command::Projects(cmd) => projects::handle(&ctx, cmd).await,
        Command::Documents(cmd) => documents::handle(&ctx, cmd).await,
        Command::Runs(cmd) => runs::handle(&ctx, cmd).await,
        Command::Run(args) => batch::handle_run(&ctx, args).await,
        Command::Batch(args) => batch::handle_batch(&ctx, args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_global_flags() {
        let cli = Cli::parse_from([
            "fz",
            "--api-url",
            "https://api.example.com",
            "-p",
            "proj-1",
            "-o",
            "json",
            "projects",
            "list",
        ]);
        assert_eq!(cli.api_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(cli.project.as_deref(), Some("proj-1"));
        assert_eq!(cli.output.as_deref(), Some("json"));
        assert!(matches!(cli.command, Command::Projects(_)));
    }

    #[test]
    fn test_parse_upload_command() {
        let cli = Cli::parse_from(["fz", "documents", "upload", "a.pdf", "b.pdf", "--wait"]);
        match cli.command {
            Command::Documents(documents::DocumentsCommand::Upload(args)) => {
                assert_eq!(args.files.len(), 2);
                assert!(args.wait);
                assert!(!args.resume);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
