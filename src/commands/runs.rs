//! Run commands: create, list, get, watch, cancel, results.

use clap::{Args, Subcommand};
use serde_json::{json, Value};

use super::Context;
use crate::error::{CliError, CliResult};
use crate::output::{format_output, Columns};
use crate::runs::{wait_for_run, WaitOptions};

const RUN_LIST_COLUMNS: Columns<'static> = &[
    ("id", "ID"),
    ("status", "STATUS"),
    ("schemaName", "SCHEMA"),
    ("versionNumber", "VERSION"),
    ("resultCount", "RESULTS"),
    ("durationSeconds", "DURATION(s)"),
    ("createdAt", "CREATED"),
];

const RESULT_LIST_COLUMNS: Columns<'static> = &[
    ("sequenceNumber", "SEQ"),
    ("documentId", "DOCUMENT"),
    ("qualityScore", "QUALITY"),
    ("data", "DATA"),
];

#[derive(Debug, Subcommand)]
pub enum RunsCommand {
    /// Create a new extraction run.
    Create(CreateArgs),
    /// List runs for a project.
    List(ListArgs),
    /// Show details for a specific run.
    Get { run_id: String },
    /// Watch a run's progress until it reaches a terminal state.
    Watch { run_id: String },
    /// Cancel a running extraction run.
    Cancel { run_id: String },
    /// List or get results for a run.
    Results(ResultsArgs),
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    /// Schema definition ID.
    #[arg(long = "schema")]
    pub schema_id: String,
    /// Schema version ID.
    #[arg(long = "schema-version")]
    pub schema_version_id: Option<String>,
    /// Prompt definition ID.
    #[arg(long = "prompt")]
    pub prompt_id: Option<String>,
    /// Prompt version ID.
    #[arg(long = "prompt-version")]
    pub prompt_version_id: Option<String>,
    /// Webhook config ID.
    #[arg(long = "webhook")]
    pub webhook_id: Option<String>,
    /// Input parameters as a JSON string.
    #[arg(long = "params")]
    pub params_json: Option<String>,
    /// External run ID for tracking.
    #[arg(long = "external-id")]
    pub external_id: Option<String>,
    /// Pipeline identifier.
    #[arg(long)]
    pub pipeline: Option<String>,
    /// Wait for the run to complete.
    #[arg(long)]
    pub wait: bool,
    /// Timeout in seconds when waiting (default from config).
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Filter by run status.
    #[arg(long)]
    pub status: Option<String>,
    /// Filter by schema definition ID.
    #[arg(long = "schema")]
    pub schema_id: Option<String>,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub offset: Option<u64>,
}

#[derive(Debug, Args)]
pub struct ResultsArgs {
    pub run_id: String,
    /// Fetch a specific result ID.
    #[arg(long = "result")]
    pub result_id: Option<String>,
    #[arg(long)]
    pub limit: Option<u64>,
    #[arg(long)]
    pub offset: Option<u64>,
}

/// Build a run-creation payload from the shared flag set.
pub fn build_run_payload(args: &CreateArgs) -> CliResult<Value> {
    let mut payload = json!({"schemaDefinitionId": args.schema_id});
    let fields = [
        ("schemaVersionId", &args.schema_version_id),
        ("promptDefinitionId", &args.prompt_id),
        ("promptVersionId", &args.prompt_version_id),
        ("webhookConfigId", &args.webhook_id),
        ("externalRunId", &args.external_id),
        ("pipeline", &args.pipeline),
    ];
    for (key, value) in fields {
        if let Some(value) = value {
            payload[key] = json!(value);
        }
    }
    if let Some(params) = &args.params_json {
        let parsed: Value = serde_json::from_str(params)
            .map_err(|err| CliError::General(format!("Invalid JSON for --params: {err}")))?;
        payload["inputParameters"] = parsed;
    }
    Ok(payload)
}

pub fn wait_options(ctx: &Context, timeout: Option<u64>) -> WaitOptions {
    WaitOptions {
        poll_interval: ctx.config.run_poll_interval,
        timeout: timeout.unwrap_or(ctx.config.run_timeout),
        quiet: ctx.quiet,
    }
}

pub async fn handle(ctx: &Context, cmd: RunsCommand) -> CliResult<()> {
    match cmd {
        RunsCommand::Create(args) => create(ctx, args).await,
        RunsCommand::List(args) => list(ctx, args).await,
        RunsCommand::Get { run_id } => {
            let data: Value = ctx
                .client
                .get(&format!("/api/runs/{run_id}"))
                .await?
                .json()
                .await?;
            format_output(&data, None, ctx.format, ctx.quiet);
            Ok(())
        }
        RunsCommand::Watch { run_id } => watch(ctx, &run_id).await,
        RunsCommand::Cancel { run_id } => {
            let data: Value = ctx
                .client
                .post_empty(&format!("/api/runs/{run_id}/cancel"))
                .await?
                .json()
                .await?;
            if !ctx.quiet {
                eprintln!("Run cancelled: {run_id}");
            }
            format_output(&data, None, ctx.format, ctx.quiet);
            Ok(())
        }
        RunsCommand::Results(args) => results(ctx, args).await,
    }
}

async fn create(ctx: &Context, args: CreateArgs) -> CliResult<()> {
    let pid = ctx.resolve_project(None)?;
    let payload = build_run_payload(&args)?;

    let mut run = crate::runs::create_run(&ctx.client, &pid, &payload).await?;
    let run_id = run
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("?")
        .to_string();
    if !ctx.quiet {
        eprintln!("Run created: {run_id}");
    }

    if args.wait {
        run = wait_for_run(&ctx.client, &run_id, &wait_options(ctx, args.timeout)).await?;
    }
    format_output(&run, None, ctx.format, ctx.quiet);
    Ok(())
}

async fn list(ctx: &Context, args: ListArgs) -> CliResult<()> {
    let pid = ctx.resolve_project(None)?;

    let mut params: Vec<(&str, String)> = Vec::new();
    if let Some(status) = args.status {
        params.push(("status", status));
    }
    if let Some(schema_id) = args.schema_id {
        params.push(("schemaId", schema_id));
    }
    if let Some(limit) = args.limit {
        params.push(("limit", limit.to_string()));
    }
    if let Some(offset) = args.offset {
        params.push(("offset", offset.to_string()));
    }

    let data: Value = ctx
        .client
        .get_query(&format!("/api/projects/{pid}/runs"), &params)
        .await?
        .json()
        .await?;
    format_output(&data, Some(RUN_LIST_COLUMNS), ctx.format, ctx.quiet);
    Ok(())
}

/// Watch mirrors wait, but a failed run is reported rather than mapped to
/// an error exit: the watcher asked to observe, not to gate on success.
async fn watch(ctx: &Context, run_id: &str) -> CliResult<()> {
    let opts = WaitOptions {
        poll_interval: ctx.config.run_poll_interval,
        timeout: ctx.config.run_timeout,
        quiet: false,
    };
    match wait_for_run(&ctx.client, run_id, &opts).await {
        Ok(run) => {
            match run.get("status").and_then(|v| v.as_str()).unwrap_or("") {
                "completed" => eprintln!("Run {run_id} completed successfully."),
                "cancelled" => eprintln!("Run {run_id} was cancelled."),
                _ => {}
            }
            Ok(())
        }
        Err(CliError::RunFailed(message)) => {
            eprintln!("Run {run_id} failed: {message}");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

async fn results(ctx: &Context, args: ResultsArgs) -> CliResult<()> {
    let run_id = &args.run_id;

    if let Some(result_id) = args.result_id {
        let data: Value = ctx
            .client
            .get(&format!("/api/runs/{run_id}/results/{result_id}"))
            .await?
            .json()
            .await?;
        format_output(&data, None, ctx.format, ctx.quiet);
        return Ok(());
    }

    let mut params: Vec<(&str, String)> = Vec::new();
    if let Some(limit) = args.limit {
        params.push(("limit", limit.to_string()));
    }
    if let Some(offset) = args.offset {
        params.push(("offset", offset.to_string()));
    }

    let data: Value = ctx
        .client
        .get_query(&format!("/api/runs/{run_id}/results"), &params)
        .await?
        .json()
        .await?;
    format_output(&data, Some(RESULT_LIST_COLUMNS), ctx.format, ctx.quiet);
    Ok(())
}
