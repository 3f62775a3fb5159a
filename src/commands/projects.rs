//! Project commands: list, create, get, update, delete.

use clap::{Args, Subcommand};
use serde_json::{json, Value};

use super::Context;
use crate::error::{CliError, CliResult};
use crate::output::{format_output, Columns};

const PROJECT_LIST_COLUMNS: Columns<'static> = &[
    ("id", "ID"),
    ("name", "NAME"),
    ("documentCount", "DOCS"),
    ("schemaCount", "SCHEMAS"),
    ("runCount", "RUNS"),
    ("createdAt", "CREATED"),
];

#[derive(Debug, Subcommand)]
pub enum ProjectsCommand {
    /// List all projects.
    List,
    /// Create a new project.
    Create(CreateArgs),
    /// Show details for a project.
    Get {
        project_id: Option<String>,
    },
    /// Update a project's name or description.
    Update(UpdateArgs),
    /// Delete a project.
    Delete {
        project_id: Option<String>,
        /// Skip the confirmation prompt.
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub name: String,
    /// Project description.
    #[arg(short, long)]
    pub description: Option<String>,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub project_id: Option<String>,
    /// New project name.
    #[arg(short, long)]
    pub name: Option<String>,
    /// New project description.
    #[arg(short, long)]
    pub description: Option<String>,
}

/// Prompt for confirmation on stderr; any answer other than y/yes declines.
pub fn confirm_or_abort(prompt: &str) -> CliResult<()> {
    eprint!("{prompt} [y/N]: ");
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    if answer == "y" || answer == "yes" {
        Ok(())
    } else {
        Err(CliError::Cancelled)
    }
}

pub async fn handle(ctx: &Context, cmd: ProjectsCommand) -> CliResult<()> {
    match cmd {
        ProjectsCommand::List => {
            let data: Value = ctx.client.get("/api/projects").await?.json().await?;
            format_output(&data, Some(PROJECT_LIST_COLUMNS), ctx.format, ctx.quiet);
        }
        ProjectsCommand::Create(args) => {
            let mut payload = json!({"name": args.name});
            if let Some(description) = args.description {
                payload["description"] = json!(description);
            }
            let data: Value = ctx
                .client
                .post_json("/api/projects", &payload)
                .await?
                .json()
                .await?;
            if !ctx.quiet {
                let id = data.get("id").and_then(|v| v.as_str()).unwrap_or("?");
                eprintln!("Project created: {id}");
            }
            format_output(&data, None, ctx.format, ctx.quiet);
        }
        ProjectsCommand::Get { project_id } => {
            let pid = ctx.resolve_project(project_id.as_deref())?;
            let data: Value = ctx
                .client
                .get(&format!("/api/projects/{pid}"))
                .await?
                .json()
                .await?;
            format_output(&data, None, ctx.format, ctx.quiet);
        }
        ProjectsCommand::Update(args) => {
            let pid = ctx.resolve_project(args.project_id.as_deref())?;
            if args.name.is_none() && args.description.is_none() {
                return Err(CliError::General(
                    "Provide at least --name or --description to update.".to_string(),
                ));
            }
            let mut payload = json!({});
            if let Some(name) = args.name {
                payload["name"] = json!(name);
            }
            if let Some(description) = args.description {
                payload["description"] = json!(description);
            }
            let data: Value = ctx
                .client
                .put_json(&format!("/api/projects/{pid}"), &payload)
                .await?
                .json()
                .await?;
            if !ctx.quiet {
                eprintln!("Project updated: {pid}");
            }
            format_output(&data, None, ctx.format, ctx.quiet);
        }
        ProjectsCommand::Delete {
            project_id,
            confirm,
        } => {
            let pid = ctx.resolve_project(project_id.as_deref())?;
            if !confirm {
                confirm_or_abort(&format!("Delete project {pid}? This cannot be undone"))?;
            }
            ctx.client.delete(&format!("/api/projects/{pid}")).await?;
            if !ctx.quiet {
                eprintln!("Project deleted: {pid}");
            }
        }
    }
    Ok(())
}
