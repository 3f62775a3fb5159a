//! Run lifecycle: create, poll to a terminal state, collect results.

use std::time::{Duration, Instant};

use serde_json::Value;

use crate::client::FzClient;
use crate::error::{CliError, CliResult};
use crate::interrupt::InterruptGuard;

/// File extensions the batch driver picks up.
pub const SUPPORTED_EXTENSIONS: [&str; 12] = [
    "pdf", "png", "jpg", "jpeg", "tiff", "tif", "doc", "docx", "xls", "xlsx", "csv", "txt",
];

const RESULT_PAGE_LIMIT: u64 = 100;

/// Terminal run statuses: no further transitions occur.
pub fn is_terminal(status: &str) -> bool {
    matches!(status, "completed" | "failed" | "cancelled")
}

/// Whether a file's extension is in the supported set.
pub fn is_supported_file(path: &std::path::Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.as_str()))
        .unwrap_or(false)
}

/// Create a run and return the server's run object.
pub async fn create_run(fz: &FzClient, project_id: &str, payload: &Value) -> CliResult<Value> {
    Ok(fz
        .post_json(&format!("/api/projects/{project_id}/runs"), payload)
        .await?
        .json()
        .await?)
}

#[derive(Debug, Clone)]
pub struct WaitOptions {
    pub poll_interval: u64,
    pub timeout: u64,
    pub quiet: bool,
}

/// Sleep in short slices so an interrupt is noticed promptly.
/// Returns `true` if the wait was interrupted.
async fn interruptible_sleep(duration: Duration, guard: &InterruptGuard) -> bool {
    const CHECK_INTERVAL: Duration = Duration::from_millis(100);
    let start = Instant::now();

    while start.elapsed() < duration {
        if guard.is_interrupted() {
            return true;
        }
        let remaining = duration.saturating_sub(start.elapsed());
        tokio::time::sleep(remaining.min(CHECK_INTERVAL)).await;
    }
    guard.is_interrupted()
}

/// Poll a run until it reaches a terminal status or times out.
///
/// Shows a single-line carriage-return status indicator unless quiet.
/// A `failed` terminal state maps to [`CliError::RunFailed`]; exceeding the
/// timeout maps to [`CliError::Timeout`]. Ctrl+C leaves the run going
/// server-side and returns the last snapshot.
pub async fn wait_for_run(fz: &FzClient, run_id: &str, opts: &WaitOptions) -> CliResult<Value> {
    let guard = InterruptGuard::watch();
    let start = Instant::now();

    let run = loop {
        let run: Value = fz.get(&format!("/api/runs/{run_id}")).await?.json().await?;
        let status = run.get("status").and_then(|v| v.as_str()).unwrap_or("");

        if !opts.quiet {
            let progress = run
                .get("progressPercent")
                .map(|v| v.to_string())
                .unwrap_or_default();
            let message = run
                .get("progressMessage")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            eprint!("\r  Status: {status}  Progress: {progress}%  {message}    ");
        }

        if is_terminal(status) {
            if !opts.quiet {
                eprintln!();
            }
            break run;
        }

        if start.elapsed() > Duration::from_secs(opts.timeout) {
            if !opts.quiet {
                eprintln!();
            }
            return Err(CliError::Timeout("Timeout waiting for run.".to_string()));
        }

        if interruptible_sleep(Duration::from_secs(opts.poll_interval), &guard).await {
            if !opts.quiet {
                eprintln!();
            }
            eprintln!("Interrupted. Run {run_id} continues on server.");
            return Ok(run);
        }
    };

    if run.get("status").and_then(|v| v.as_str()) == Some("failed") {
        let message = run
            .get("errorMessage")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error");
        return Err(CliError::RunFailed(message.to_string()));
    }
    Ok(run)
}

/// Fetch all results for a run, paginating until the total is covered or a
/// page comes back empty.
pub async fn fetch_all_results(fz: &FzClient, run_id: &str) -> CliResult<Vec<Value>> {
    let mut results = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let page: Value = fz
            .get_query(
                &format!("/api/runs/{run_id}/results"),
                &[
                    ("offset", offset.to_string()),
                    ("limit", RESULT_PAGE_LIMIT.to_string()),
                ],
            )
            .await?
            .json()
            .await?;

        let items: Vec<Value> = match &page {
            Value::Object(obj) => obj
                .get("items")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default(),
            Value::Array(arr) => arr.clone(),
            _ => Vec::new(),
        };
        let total = page.get("total").and_then(|v| v.as_u64()).unwrap_or(0);
        let empty = items.is_empty();
        results.extend(items);

        if offset + RESULT_PAGE_LIMIT >= total || empty {
            break;
        }
        offset += RESULT_PAGE_LIMIT;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal("completed"));
        assert!(is_terminal("failed"));
        assert!(is_terminal("cancelled"));
        assert!(!is_terminal("pending"));
        assert!(!is_terminal("running"));
        assert!(!is_terminal(""));
    }

    #[test]
    fn test_supported_file_extensions() {
        assert!(is_supported_file(Path::new("scan.pdf")));
        assert!(is_supported_file(Path::new("SCAN.PDF")));
        assert!(is_supported_file(Path::new("table.xlsx")));
        assert!(!is_supported_file(Path::new("archive.zip")));
        assert!(!is_supported_file(Path::new("noextension")));
    }
}
