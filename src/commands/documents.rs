//! Document commands: upload, list, get, delete.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde_json::Value;

use super::projects::confirm_or_abort;
use super::Context;
use crate::error::{CliError, CliResult};
use crate::output::{format_output, Columns};
use crate::upload::{upload_files, UploadOptions};

const DOCUMENT_LIST_COLUMNS: Columns<'static> = &[
    ("id", "ID"),
    ("fileName", "FILE NAME"),
    ("fileType", "TYPE"),
    ("fileSizeBytes", "SIZE (B)"),
    ("status", "STATUS"),
    ("createdAt", "CREATED"),
];

#[derive(Debug, Subcommand)]
pub enum DocumentsCommand {
    /// Upload one or more files to a project.
    Upload(UploadArgs),
    /// List documents in a project.
    List {
        /// Filter by status (e.g. ready, processing, failed).
        #[arg(long)]
        status: Option<String>,
    },
    /// Show details for a document.
    Get { document_id: String },
    /// Delete a document.
    Delete {
        document_id: String,
        /// Skip the confirmation prompt.
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// Files to upload.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Wait for processing to complete.
    #[arg(long)]
    pub wait: bool,
    /// Resume interrupted uploads.
    #[arg(long)]
    pub resume: bool,
}

pub async fn handle(ctx: &Context, cmd: DocumentsCommand) -> CliResult<()> {
    match cmd {
        DocumentsCommand::Upload(args) => upload(ctx, args).await,
        DocumentsCommand::List { status } => {
            let pid = ctx.resolve_project(None)?;
            let path = format!("/api/projects/{pid}/documents");
            let response = match status {
                Some(status) => ctx.client.get_query(&path, &[("status", status)]).await?,
                None => ctx.client.get(&path).await?,
            };
            let data: Value = response.json().await?;
            format_output(&data, Some(DOCUMENT_LIST_COLUMNS), ctx.format, ctx.quiet);
            Ok(())
        }
        DocumentsCommand::Get { document_id } => {
            let data: Value = ctx
                .client
                .get(&format!("/api/documents/{document_id}"))
                .await?
                .json()
                .await?;
            format_output(&data, None, ctx.format, ctx.quiet);
            Ok(())
        }
        DocumentsCommand::Delete {
            document_id,
            confirm,
        } => {
            if !confirm {
                confirm_or_abort(&format!(
                    "Delete document {document_id}? This cannot be undone"
                ))?;
            }
            ctx.client
                .delete(&format!("/api/documents/{document_id}"))
                .await?;
            if !ctx.quiet {
                eprintln!("Document deleted: {document_id}");
            }
            Ok(())
        }
    }
}

async fn upload(ctx: &Context, args: UploadArgs) -> CliResult<()> {
    let pid = ctx.resolve_project(None)?;

    // Deduplicate while preserving order; the shell has already expanded
    // any glob patterns.
    let mut seen = std::collections::HashSet::new();
    let mut files = Vec::new();
    for path in args.files {
        if !path.is_file() {
            return Err(CliError::General(format!(
                "Not a file: {}",
                path.display()
            )));
        }
        if seen.insert(path.clone()) {
            files.push(path);
        }
    }

    let opts = UploadOptions {
        wait: args.wait,
        resume: args.resume,
        concurrency: ctx.config.upload_concurrency,
        retry_attempts: ctx.config.upload_retry_attempts,
    };
    let documents = upload_files(&ctx.client, &pid, &files, &opts).await?;

    format_output(
        &Value::Array(documents),
        Some(DOCUMENT_LIST_COLUMNS),
        ctx.format,
        ctx.quiet,
    );
    Ok(())
}
