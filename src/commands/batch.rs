//! Composite workflows: `fz run` (upload + create + wait) and `fz batch`.

use std::io::Write;
use std::path::PathBuf;

use clap::Args;
use serde_json::{json, Value};

use super::runs::{build_run_payload, wait_options, CreateArgs};
use super::Context;
use crate::error::{CliError, CliResult};
use crate::output::format_output;
use crate::runs::{create_run, fetch_all_results, is_supported_file, wait_for_run};
use crate::upload::{upload_files, UploadOptions};

#[derive(Debug, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub create: CreateArgs,
    /// File(s) to upload before creating the run (repeatable).
    #[arg(long = "upload")]
    pub upload_paths: Vec<PathBuf>,
}

#[derive(Debug, Args)]
pub struct BatchArgs {
    /// Schema definition ID.
    #[arg(long = "schema")]
    pub schema_id: String,
    /// Directory of files to process.
    #[arg(long = "dir")]
    pub input_dir: PathBuf,
    /// Files per batch.
    #[arg(long = "batch-size", default_value_t = 10)]
    pub batch_size: usize,
    /// Upload concurrency.
    #[arg(long, default_value_t = 2)]
    pub concurrency: usize,
    /// Write results to this file as JSONL.
    #[arg(long = "output-file")]
    pub output_file: Option<PathBuf>,
    /// Timeout in seconds per run (default from config).
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Upload files, create a run, and optionally wait for results.
pub async fn handle_run(ctx: &Context, args: RunArgs) -> CliResult<()> {
    let pid = ctx.resolve_project(None)?;

    if !args.upload_paths.is_empty() {
        if !ctx.quiet {
            eprintln!("Uploading {} file(s)...", args.upload_paths.len());
        }
        let opts = UploadOptions {
            // Documents must be ready before the run starts.
            wait: true,
            resume: false,
            concurrency: ctx.config.upload_concurrency,
            retry_attempts: ctx.config.upload_retry_attempts,
        };
        upload_files(&ctx.client, &pid, &args.upload_paths, &opts).await?;
    }

    let payload = build_run_payload(&args.create)?;
    let mut run = create_run(&ctx.client, &pid, &payload).await?;
    let run_id = run
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("?")
        .to_string();
    if !ctx.quiet {
        eprintln!("Run created: {run_id}");
    }

    if args.create.wait {
        run = wait_for_run(
            &ctx.client,
            &run_id,
            &wait_options(ctx, args.create.timeout),
        )
        .await?;

        let results = fetch_all_results(&ctx.client, &run_id).await?;
        if !ctx.quiet {
            eprintln!("Run completed with {} result(s).", results.len());
        }
        let total = results.len();
        format_output(
            &json!({"items": results, "total": total}),
            None,
            ctx.format,
            ctx.quiet,
        );
    } else {
        format_output(&run, None, ctx.format, ctx.quiet);
    }
    Ok(())
}

/// Batch-process a directory: scan for supported files, upload in batches,
/// run each batch, and collect results — streamed to a JSONL file when one
/// is given, accumulated in memory otherwise.
pub async fn handle_batch(ctx: &Context, args: BatchArgs) -> CliResult<()> {
    let pid = ctx.resolve_project(None)?;

    let mut all_files: Vec<PathBuf> = std::fs::read_dir(&args.input_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_supported_file(path))
        .collect();
    all_files.sort();

    if all_files.is_empty() {
        return Err(CliError::General(format!(
            "No supported files found in {}.",
            args.input_dir.display()
        )));
    }
    if !ctx.quiet {
        eprintln!(
            "Found {} file(s) in {}.",
            all_files.len(),
            args.input_dir.display()
        );
    }

    let batch_size = args.batch_size.max(1);
    let batches: Vec<&[PathBuf]> = all_files.chunks(batch_size).collect();
    if !ctx.quiet {
        eprintln!(
            "Processing in {} batch(es) of up to {batch_size} files.",
            batches.len()
        );
    }

    let upload_opts = UploadOptions {
        wait: true,
        resume: false,
        concurrency: args.concurrency.max(1),
        retry_attempts: ctx.config.upload_retry_attempts,
    };

    let mut output_handle = match &args.output_file {
        Some(path) => Some(std::fs::File::create(path)?),
        None => None,
    };
    // Only populated when streaming to a file is off.
    let mut all_results: Vec<Value> = Vec::new();
    let mut total_result_count = 0usize;

    for (batch_idx, batch_files) in batches.iter().enumerate() {
        if !ctx.quiet {
            eprintln!(
                "\n--- Batch {}/{} ({} files) ---",
                batch_idx + 1,
                batches.len(),
                batch_files.len()
            );
        }

        upload_files(&ctx.client, &pid, batch_files, &upload_opts).await?;

        let payload = json!({"schemaDefinitionId": args.schema_id});
        let run = create_run(&ctx.client, &pid, &payload).await?;
        let run_id = run
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("?")
            .to_string();
        if !ctx.quiet {
            eprintln!("Run created: {run_id}");
        }

        wait_for_run(&ctx.client, &run_id, &wait_options(ctx, args.timeout)).await?;

        let results = fetch_all_results(&ctx.client, &run_id).await?;
        total_result_count += results.len();
        if !ctx.quiet {
            eprintln!(
                "Batch {} complete: {} result(s).",
                batch_idx + 1,
                results.len()
            );
        }

        match &mut output_handle {
            Some(file) => {
                for result in &results {
                    writeln!(file, "{result}")?;
                }
                file.flush()?;
            }
            None => all_results.extend(results),
        }
    }

    if !ctx.quiet {
        eprintln!(
            "\nBatch processing complete: {} file(s), {} batch(es), {total_result_count} total result(s).",
            all_files.len(),
            batches.len()
        );
        if let Some(path) = &args.output_file {
            eprintln!("Results written to {}", path.display());
        }
    }
    if output_handle.is_none() {
        format_output(
            &json!({"items": all_results, "total": total_result_count}),
            None,
            ctx.format,
            ctx.quiet,
        );
    }
    Ok(())
}
