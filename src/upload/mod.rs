//! Concurrent multipart upload engine.
//!
//! Four-step presigned-URL protocol:
//! 1. `POST /api/projects/{pid}/uploads/init` — declare the file, receive
//!    an upload id, part size, and presigned part URLs.
//! 2. `PUT` each part to its presigned URL, in parallel, bounded by the
//!    configured concurrency.
//! 3. `POST /api/uploads/{id}/parts` — acknowledge each finished part on a
//!    small background pool so reporting never serializes uploads.
//! 4. `POST /api/uploads/{id}/complete` — finalize and receive the document.
//!
//! Ctrl+C sets a shared abort flag; workers observe it before every attempt
//! and the coordinator deletes the upload server-side.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use indicatif::{ProgressBar, ProgressStyle};
use md5::{Digest, Md5};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::backoff::retry_delay;
use crate::client::FzClient;
use crate::error::{CliError, CliResult};
use crate::interrupt::InterruptGuard;

/// Workers acknowledging parts to the backend.
const REPORT_CONCURRENCY: usize = 2;

const READY_POLL_INTERVAL: Duration = Duration::from_secs(2);
const READY_TIMEOUT: Duration = Duration::from_secs(600);

/// Upload tuning knobs, resolved from config by the command layer.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub wait: bool,
    pub resume: bool,
    pub concurrency: usize,
    pub retry_attempts: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            wait: false,
            resume: false,
            concurrency: crate::constants::UPLOAD_CONCURRENCY,
            retry_attempts: crate::constants::UPLOAD_RETRY_ATTEMPTS,
        }
    }
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitResponse {
    upload_id: String,
    part_size_bytes: u64,
    total_parts: u32,
    presigned_urls: Vec<PresignedPart>,
    is_single_part: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PresignedPart {
    part_number: u32,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadStatusResponse {
    #[serde(default)]
    parts_uploaded: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResumeResponse {
    presigned_urls: Vec<PresignedPart>,
}

/// One part's work order.
#[derive(Debug, Clone)]
struct PartSpec {
    url: String,
    part_number: u32,
    offset: u64,
    size: u64,
}

#[derive(Debug)]
enum PartFailure {
    Aborted,
    Failed(String),
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// MIME type from the filename extension; unknown extensions are octet-stream.
pub fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "tiff" | "tif" => "image/tiff",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "csv" => "text/csv",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Size-proportional part timeout: 30s per MiB, at least 60s.
fn part_timeout(size_bytes: u64) -> Duration {
    let size_mb = size_bytes as f64 / (1024.0 * 1024.0);
    Duration::from_secs_f64((size_mb * 30.0).max(60.0))
}

/// Base64-encoded MD5 digest for the S3 `Content-MD5` header.
fn content_md5(data: &[u8]) -> String {
    BASE64_STANDARD.encode(Md5::digest(data))
}

pub fn human_size(mut size: f64) -> String {
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TB")
}

/// Connection pool for presigned-URL PUTs, distinct from the API pool.
pub fn s3_client(concurrency: usize) -> CliResult<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .pool_max_idle_per_host(concurrency)
        .build()?)
}

async fn read_chunk(path: &Path, offset: u64, size: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; size as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

// ── Part worker ─────────────────────────────────────────────────────────────

/// Upload one part, retrying with backoff. The chunk is re-read from disk
/// on every attempt so no buffer lives across retries.
#[allow(clippy::too_many_arguments)]
async fn upload_part(
    s3: reqwest::Client,
    spec: PartSpec,
    file_path: PathBuf,
    is_single_part: bool,
    mime_type: &'static str,
    max_retries: usize,
    aborted: Arc<AtomicBool>,
) -> Result<(u32, String, u64), PartFailure> {
    let pn = spec.part_number;

    for attempt in 0..max_retries {
        if aborted.load(Ordering::SeqCst) {
            return Err(PartFailure::Aborted);
        }

        let failure = match read_chunk(&file_path, spec.offset, spec.size).await {
            Err(err) => format!("Part {pn}: read failed: {err}"),
            Ok(chunk) => {
                let mut request = s3
                    .put(&spec.url)
                    .header("Content-MD5", content_md5(&chunk))
                    .timeout(part_timeout(spec.size));
                if is_single_part {
                    request = request.header("Content-Type", mime_type);
                }

                match request.body(chunk).send().await {
                    Ok(resp) if resp.status().is_success() => {
                        let etag = resp
                            .headers()
                            .get(reqwest::header::ETAG)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .trim_matches('"')
                            .to_string();
                        return Ok((pn, etag, spec.size));
                    }
                    Ok(resp) => format!("Part {pn}: HTTP {}", resp.status().as_u16()),
                    Err(err) if err.is_timeout() => format!(
                        "Part {pn}: upload timed out after {:.0}s",
                        part_timeout(spec.size).as_secs_f64()
                    ),
                    Err(err) => format!("Part {pn}: {err}"),
                }
            }
        };

        if attempt + 1 == max_retries {
            return Err(PartFailure::Failed(failure));
        }
        eprintln!("  Retry {}/{} for part {pn} ({failure})", attempt + 1, max_retries);
        tokio::time::sleep(retry_delay(attempt)).await;
    }

    Err(PartFailure::Failed(format!(
        "Failed to upload part {pn} after {max_retries} attempts"
    )))
}

/// Acknowledge a completed part to the backend. Non-fatal: the server
/// tolerates missing acknowledgements up to completion.
async fn report_part(fz: Arc<FzClient>, upload_id: String, pn: u32, etag: String, size: u64) {
    let body = json!({
        "partNumber": pn,
        "etag": etag,
        "sizeBytes": size,
    });
    if let Err(err) = fz
        .post_json(&format!("/api/uploads/{upload_id}/parts"), &body)
        .await
    {
        eprintln!("  Warning: failed to report part {pn}: {err}");
        warn!("part acknowledgement failed for part {pn}: {err}");
    }
}

// ── Single-file upload ──────────────────────────────────────────────────────

/// Upload a single file through the multipart flow.
///
/// Returns the document object from the API. A Ctrl+C during the upload
/// deletes the server-side upload and surfaces as [`CliError::Cancelled`].
pub async fn upload_file(
    fz: &Arc<FzClient>,
    s3: &reqwest::Client,
    project_id: &str,
    file_path: &Path,
    opts: &UploadOptions,
    progress: Option<&ProgressBar>,
) -> CliResult<Value> {
    let file_size = tokio::fs::metadata(file_path).await?.len();
    let file_name = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CliError::General(format!("Invalid file name: {}", file_path.display())))?
        .to_string();
    let mime_type = guess_mime(file_path);

    // Step 1: init
    let init: InitResponse = fz
        .post_json(
            &format!("/api/projects/{project_id}/uploads/init"),
            &json!({
                "fileName": file_name,
                "fileSizeBytes": file_size,
                "mimeType": mime_type,
                "sourceType": "cli",
            }),
        )
        .await?
        .json()
        .await?;

    let upload_id = init.upload_id.clone();
    let mut presigned_urls = init.presigned_urls.clone();

    // Step 1a: resume — swap in fresh URLs for the remaining parts.
    if opts.resume && !init.is_single_part {
        let status: UploadStatusResponse = fz
            .get(&format!("/api/uploads/{upload_id}"))
            .await?
            .json()
            .await?;
        if status.parts_uploaded > 0 {
            let resume: ResumeResponse = fz
                .post_empty(&format!("/api/uploads/{upload_id}/resume"))
                .await?
                .json()
                .await?;
            presigned_urls = resume.presigned_urls;
            eprintln!(
                "  Resuming: {}/{} parts already uploaded",
                status.parts_uploaded, init.total_parts
            );
        }
    }

    // Step 2: parallel part upload.
    let specs: Vec<PartSpec> = presigned_urls
        .iter()
        .map(|p| {
            let offset = (p.part_number as u64 - 1) * init.part_size_bytes;
            PartSpec {
                url: p.url.clone(),
                part_number: p.part_number,
                offset,
                size: init.part_size_bytes.min(file_size.saturating_sub(offset)),
            }
        })
        .collect();

    let part_count = specs.len();
    let guard = InterruptGuard::upload();
    let aborted = guard.flag();
    let upload_sem = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let report_sem = Arc::new(Semaphore::new(REPORT_CONCURRENCY));

    let mut part_tasks: JoinSet<Result<(u32, String, u64), PartFailure>> = JoinSet::new();
    for spec in specs {
        let s3 = s3.clone();
        let path = file_path.to_path_buf();
        let aborted = Arc::clone(&aborted);
        let sem = Arc::clone(&upload_sem);
        let retry_attempts = opts.retry_attempts;
        let is_single_part = init.is_single_part;
        part_tasks.spawn(async move {
            let _permit = sem.acquire_owned().await.expect("semaphore never closed");
            upload_part(s3, spec, path, is_single_part, mime_type, retry_attempts, aborted).await
        });
    }

    let mut report_tasks: JoinSet<()> = JoinSet::new();
    let mut uploaded_parts: Vec<(u32, String, u64)> = Vec::new();
    let mut first_error: Option<PartFailure> = None;

    while let Some(joined) = part_tasks.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => Err(PartFailure::Failed(format!("worker panicked: {err}"))),
        };

        match outcome {
            Ok((pn, etag, size)) => {
                uploaded_parts.push((pn, etag.clone(), size));

                // Step 3: background acknowledgement.
                let fz = Arc::clone(fz);
                let upload_id = upload_id.clone();
                let sem = Arc::clone(&report_sem);
                let aborted = Arc::clone(&aborted);
                report_tasks.spawn(async move {
                    let _permit = sem.acquire_owned().await.expect("semaphore never closed");
                    if !aborted.load(Ordering::SeqCst) {
                        report_part(fz, upload_id, pn, etag, size).await;
                    }
                });

                if let Some(pb) = progress {
                    pb.inc(size);
                }
            }
            Err(failure) => {
                if first_error.is_none() {
                    first_error = Some(failure);
                }
                // Cooperative shutdown: in-flight parts observe the flag
                // before their next attempt.
                aborted.store(true, Ordering::SeqCst);
            }
        }
    }

    while report_tasks.join_next().await.is_some() {}
    drop(guard);

    if aborted.load(Ordering::SeqCst) && first_error.is_none() {
        first_error = Some(PartFailure::Aborted);
    }

    if let Some(failure) = first_error {
        // Best-effort server-side cleanup before surfacing the failure.
        let _ = fz.delete(&format!("/api/uploads/{upload_id}")).await;
        return Err(match failure {
            PartFailure::Aborted => CliError::Cancelled,
            PartFailure::Failed(msg) => CliError::General(format!("Upload failed: {msg}")),
        });
    }

    // Completion is only issued once every requested part has an etag.
    if uploaded_parts.len() != part_count {
        let _ = fz.delete(&format!("/api/uploads/{upload_id}")).await;
        return Err(CliError::General(format!(
            "Upload failed: {} of {part_count} parts completed",
            uploaded_parts.len()
        )));
    }

    // Step 4: complete.
    let completed: Value = fz
        .post_empty(&format!("/api/uploads/{upload_id}/complete"))
        .await?
        .json()
        .await?;
    let document = completed.get("document").cloned().unwrap_or(json!({}));
    let doc_id = document
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or(&upload_id)
        .to_string();

    if opts.wait {
        return wait_for_ready(fz, &doc_id).await;
    }
    Ok(document)
}

/// Poll until the document finishes processing.
///
/// Terminal statuses: `ready` (success) and `failed` (logged, document
/// still returned). Anything else times out into a sentinel document.
pub async fn wait_for_ready(fz: &Arc<FzClient>, doc_id: &str) -> CliResult<Value> {
    let start = std::time::Instant::now();
    while start.elapsed() < READY_TIMEOUT {
        let doc: Value = fz
            .get(&format!("/api/documents/{doc_id}"))
            .await?
            .json()
            .await?;
        match doc.get("status").and_then(|v| v.as_str()).unwrap_or("") {
            "ready" => {
                eprintln!("  Processing... ready ({:.0}s)", start.elapsed().as_secs_f64());
                return Ok(doc);
            }
            "failed" => {
                let msg = doc
                    .get("errorMessage")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown error");
                eprintln!("  Processing... failed: {msg}");
                return Ok(doc);
            }
            _ => tokio::time::sleep(READY_POLL_INTERVAL).await,
        }
    }

    eprintln!(
        "  Processing... timed out after {:.0}s",
        READY_TIMEOUT.as_secs_f64()
    );
    Ok(json!({"id": doc_id, "status": "timeout"}))
}

// ── Multi-file driver ───────────────────────────────────────────────────────

fn progress_bar(total_bytes: u64, file_name: &str) -> ProgressBar {
    if std::env::var_os("NO_COLOR").is_some() {
        return ProgressBar::hidden();
    }
    let template = "  {msg} [{bar:30}] {bytes}/{total_bytes} {bytes_per_sec}";
    let style = ProgressStyle::with_template(template)
        .expect("static template is valid")
        .progress_chars("=> ");
    ProgressBar::new(total_bytes)
        .with_style(style)
        .with_message(file_name.to_string())
}

/// Upload multiple files sequentially; each file uses the parallel part
/// engine. Cancellation propagates; the first other failure stops the
/// driver and the documents uploaded so far are returned.
pub async fn upload_files(
    fz: &Arc<FzClient>,
    project_id: &str,
    file_paths: &[PathBuf],
    opts: &UploadOptions,
) -> CliResult<Vec<Value>> {
    let s3 = s3_client(opts.concurrency)?;
    let mut documents = Vec::new();
    let mut total_bytes: u64 = 0;

    for path in file_paths {
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("?")
            .to_string();
        eprintln!("Uploading {name} ({})", human_size(size as f64));

        let pb = progress_bar(size, &name);
        let result = upload_file(fz, &s3, project_id, path, opts, Some(&pb)).await;
        pb.finish_and_clear();

        match result {
            Ok(doc) => {
                total_bytes += size;
                documents.push(doc);
            }
            Err(CliError::Cancelled) => {
                eprintln!("Upload cancelled by user.");
                return Err(CliError::Cancelled);
            }
            Err(err) => {
                eprintln!("Error uploading {name}: {err}");
                break;
            }
        }
    }

    if documents.len() == file_paths.len() {
        eprintln!(
            "\nUploaded {} document(s) ({} total)",
            documents.len(),
            human_size(total_bytes as f64)
        );
    } else {
        eprintln!(
            "\nUploaded {} of {} document(s)",
            documents.len(),
            file_paths.len()
        );
    }
    Ok(documents)
}
