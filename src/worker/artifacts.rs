use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::StatusCode;
use tokio_util::io::ReaderStream;

use crate::error::{Result, UploadError, WorkerError};
use crate::job::TaskContext;
use crate::queue::ArtifactRequest;
use crate::retry::{retry_async, RetryPolicy};

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A file to be published, with the metadata sent to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub path: PathBuf,
    pub name: String,
    pub content_type: String,
    pub storage_type: String,
    pub expires: DateTime<Utc>,
}

impl ArtifactDescriptor {
    pub fn new(path: &Path, storage_type: &str, expires: DateTime<Utc>) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            content_type: guess_content_type(path).to_string(),
            path: path.to_path_buf(),
            name,
            storage_type: storage_type.to_string(),
            expires,
        }
    }

    fn request(&self) -> ArtifactRequest {
        ArtifactRequest {
            storage_type: self.storage_type.clone(),
            expires: self.expires,
            content_type: self.content_type.clone(),
        }
    }
}

/// Outcome of publishing one file after retries.
#[derive(Debug)]
pub struct UploadReport {
    pub path: PathBuf,
    pub result: std::result::Result<(), UploadError>,
}

impl UploadReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("txt") | Some("log") => "text/plain",
        Some("json") => "application/json",
        Some("html") | Some("htm") => "text/html",
        Some("xml") => "application/xml",
        Some("csv") => "text/csv",
        Some("gz") | Some("tgz") => "application/gzip",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => DEFAULT_CONTENT_TYPE,
    }
}

/// Regular files directly inside `dir`, sorted by path. A missing directory
/// yields no files.
pub async fn discover_artifacts(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// Publishes task artifacts: asks the queue for a PUT target per file, then
/// transfers the bytes, retrying unexpected statuses with backoff.
#[derive(Debug, Clone)]
pub struct ArtifactUploader {
    http: reqwest::Client,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ArtifactUploader {
    pub fn new(http: reqwest::Client, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            http,
            retry,
            timeout,
        }
    }

    pub fn from_context(ctx: &TaskContext) -> Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::new(
            http,
            RetryPolicy::from(&ctx.config.upload_retry),
            ctx.config.upload_timeout(),
        ))
    }

    /// Upload every file in `artifact_dir` plus the task logs.
    ///
    /// Files upload concurrently and independently: one file exhausting its
    /// retries never cancels the others. Returns once every file has either
    /// succeeded or given up, in path order. An unreadable `artifact_dir` is
    /// logged and skipped so the logs are still published.
    pub async fn upload_all(&self, ctx: &Arc<TaskContext>) -> Result<Vec<UploadReport>> {
        let expires = artifact_expiry(ctx.config.artifact_expiration_hours)?;

        let mut paths = match discover_artifacts(&ctx.config.artifact_dir).await {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(
                    dir = %ctx.config.artifact_dir.display(),
                    error = %e,
                    "Could not list artifacts, uploading logs only"
                );
                Vec::new()
            }
        };
        for log in ctx.logs.all() {
            if tokio::fs::try_exists(log).await.unwrap_or(false) {
                paths.push(log.to_path_buf());
            }
        }

        let mut uploads = Vec::with_capacity(paths.len());
        for path in paths {
            let descriptor =
                ArtifactDescriptor::new(&path, &ctx.config.artifact_storage_type, expires);
            let uploader = self.clone();
            let ctx = ctx.clone();
            let upload =
                tokio::spawn(async move { uploader.retry_create_artifact(&ctx, &descriptor).await });
            uploads.push((path, upload));
        }

        let mut reports = Vec::with_capacity(uploads.len());
        for (path, upload) in uploads {
            let result = match upload.await {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Artifact upload task failed");
                    Err(UploadError::Join(e))
                }
            };
            reports.push(UploadReport { path, result });
        }
        reports.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(reports)
    }

    pub async fn retry_create_artifact(
        &self,
        ctx: &TaskContext,
        artifact: &ArtifactDescriptor,
    ) -> std::result::Result<(), UploadError> {
        let result = retry_async(&self.retry, UploadError::is_retryable, move |attempt| {
            tracing::debug!(path = %artifact.path.display(), attempt, "Uploading artifact");
            self.create_artifact(ctx, artifact)
        })
        .await;
        if let Err(e) = &result {
            tracing::warn!(path = %artifact.path.display(), error = %e, "Artifact upload failed");
        }
        result
    }

    /// One attempt: request a target from the queue, then PUT the file.
    pub async fn create_artifact(
        &self,
        ctx: &TaskContext,
        artifact: &ArtifactDescriptor,
    ) -> std::result::Result<(), UploadError> {
        let target = ctx
            .queue
            .create_artifact(&ctx.task, &ctx.credentials(), &artifact.name, &artifact.request())
            .await?;
        let content_type = if target.content_type.is_empty() {
            artifact.content_type.clone()
        } else {
            target.content_type
        };

        tracing::info!(path = %artifact.path.display(), url = %target.put_url, "Uploading artifact");
        let file = tokio::fs::File::open(&artifact.path).await?;
        let length = file.metadata().await?.len();
        let request = self
            .http
            .put(&target.put_url)
            .header(CONTENT_TYPE, content_type)
            .header(CONTENT_LENGTH, length)
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send();

        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| UploadError::Timeout)??;
        let status = response.status();
        tracing::info!(path = %artifact.path.display(), status = status.as_u16(), "Artifact upload response");

        if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
            Ok(())
        } else {
            Err(UploadError::BadStatus {
                status: status.as_u16(),
            })
        }
    }
}

/// Expiry `hours` from now, or a config error if that is not representable.
pub fn artifact_expiry(hours: i64) -> Result<DateTime<Utc>> {
    chrono::Duration::try_hours(hours)
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .ok_or_else(|| {
            WorkerError::Config(format!("artifact_expiration_hours {} is out of range", hours))
        })
}
