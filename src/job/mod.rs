//! Job orchestration
//!
//! One job per request. The lifecycle is shared by both backends:
//!
//! ```text
//! Validating ─┬─> failure
//!             └─> CacheCheck ─┬─> Done(hit)
//!                             └─> Dispatch ─┬─> Done(success)
//!                                           └─> Done(failure)
//! ```
//!
//! Dispatch runs the configured [`TransformExecutor`] for image sources and a
//! verbatim pass-through download for anything else. Nothing is retried.

pub mod external;
pub mod native;
pub mod source;

use async_trait::async_trait;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::cache::DiskCache;
use crate::metrics::Metrics;
use crate::options::TransformOptions;

pub use external::ExternalEngine;
pub use native::{DimensionLimits, NativeEngine};
pub use source::{SourceClient, SourceInfo};

/// Token reported instead of a status code when the probe times out
pub const TIMEOUT_TOKEN: &str = "ETIMEDOUT";

/// Status carried by a failed job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStatus {
    Code(u16),
    Timeout,
}

impl FailureStatus {
    /// Timeouts map to 504 at the HTTP boundary
    pub fn to_http_status(&self) -> u16 {
        match self {
            Self::Code(code) => *code,
            Self::Timeout => 504,
        }
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{}", code),
            Self::Timeout => f.write_str(TIMEOUT_TOKEN),
        }
    }
}

impl Serialize for FailureStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Code(code) => serializer.serialize_u16(*code),
            Self::Timeout => serializer.serialize_str(TIMEOUT_TOKEN),
        }
    }
}

/// Errors that terminate a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Locator cannot be resolved to a host
    BadSource { reason: String },
    /// Probe or fetch did not succeed; carries the upstream status
    SourceUnreachable { status: u16 },
    /// Probe did not answer within the timeout
    SourceTimeout,
    /// Engine exited non-zero, a stream broke, or decoding failed
    EngineFailure { message: String },
    /// The cache file could not be written
    WriteFailure { message: String },
}

impl JobError {
    pub fn bad_source(reason: impl Into<String>) -> Self {
        Self::BadSource {
            reason: reason.into(),
        }
    }

    pub fn unreachable(status: u16) -> Self {
        Self::SourceUnreachable { status }
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::EngineFailure {
            message: message.into(),
        }
    }

    pub fn write_failure(message: impl Into<String>) -> Self {
        Self::WriteFailure {
            message: message.into(),
        }
    }

    pub fn status(&self) -> FailureStatus {
        match self {
            Self::BadSource { .. } => FailureStatus::Code(400),
            Self::SourceUnreachable { status } => FailureStatus::Code(*status),
            Self::SourceTimeout => FailureStatus::Timeout,
            Self::EngineFailure { .. } | Self::WriteFailure { .. } => FailureStatus::Code(500),
        }
    }

    pub fn to_http_status(&self) -> u16 {
        self.status().to_http_status()
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadSource { .. } => "bad_source",
            Self::SourceUnreachable { .. } => "source_unreachable",
            Self::SourceTimeout => "source_timeout",
            Self::EngineFailure { .. } => "engine_failure",
            Self::WriteFailure { .. } => "write_failure",
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobError::BadSource { reason } => write!(f, "Invalid source locator: {}", reason),
            JobError::SourceUnreachable { status } => {
                write!(f, "Source responded with status {}", status)
            }
            JobError::SourceTimeout => write!(f, "Source probe timed out"),
            JobError::EngineFailure { message } => write!(f, "Transform failed: {}", message),
            JobError::WriteFailure { message } => write!(f, "Cache write failed: {}", message),
        }
    }
}

impl std::error::Error for JobError {}

/// A failed job, with the source URL for correlation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub error: JobError,
    pub url: String,
}

#[derive(Serialize)]
struct FailureBody<'a> {
    status: FailureStatus,
    url: &'a str,
}

impl JobFailure {
    pub fn status(&self) -> FailureStatus {
        self.error.status()
    }

    /// `{"status": <code or "ETIMEDOUT">, "url": "..."}`
    pub fn to_json(&self) -> String {
        let body = FailureBody {
            status: self.status(),
            url: &self.url,
        };
        serde_json::to_string(&body).unwrap_or_else(|_| {
            format!("{{\"status\":500,\"url\":{:?}}}", self.url)
        })
    }
}

/// The only externally visible result of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Success { cache_file: PathBuf, cache_hit: bool },
    Failure(JobFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Backend capability: produce the transformed image at `destination`
#[async_trait]
pub trait TransformExecutor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transform(
        &self,
        source: &SourceClient,
        options: &TransformOptions,
        info: &SourceInfo,
        destination: &Path,
    ) -> Result<(), JobError>;
}

/// Drives the job lifecycle for one backend
pub struct Orchestrator {
    source: SourceClient,
    cache: DiskCache,
    executor: Arc<dyn TransformExecutor>,
    metrics: Arc<Metrics>,
}

impl Orchestrator {
    pub fn new(
        source: SourceClient,
        cache: DiskCache,
        executor: Arc<dyn TransformExecutor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            cache,
            executor,
            metrics,
        }
    }

    pub fn engine_name(&self) -> &'static str {
        self.executor.name()
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// Run one job to completion inside its own span
    pub async fn run(&self, options: &TransformOptions) -> JobOutcome {
        let job_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!(
            "job",
            job_id = %job_id,
            engine = self.executor.name(),
            url = %options.url()
        );

        async {
            self.metrics.increment_job_started();
            let started = Instant::now();
            let outcome = match self.execute(options).await {
                Ok((cache_file, cache_hit)) => JobOutcome::Success {
                    cache_file,
                    cache_hit,
                },
                Err(error) => {
                    tracing::warn!(
                        status = %error.status(),
                        kind = error.kind(),
                        error = %error,
                        "Job failed"
                    );
                    self.metrics
                        .increment_job_failure(&error.status().to_string());
                    JobOutcome::Failure(JobFailure {
                        error,
                        url: options.url().to_string(),
                    })
                }
            };
            self.metrics
                .record_job_duration(started.elapsed().as_secs_f64() * 1000.0);
            outcome
        }
        .instrument(span)
        .await
    }

    /// Run the job on its own task and deliver the outcome exactly once
    pub fn submit(self: Arc<Self>, options: TransformOptions) -> oneshot::Receiver<JobOutcome> {
        let (tx, rx) = oneshot::channel();
        let url = options.url().to_string();

        tokio::spawn(async move {
            let mut completion = Completion::new(tx, url);
            let outcome = self.run(&options).await;
            completion.complete(outcome);
        });

        rx
    }

    async fn execute(&self, options: &TransformOptions) -> Result<(PathBuf, bool), JobError> {
        let info = self.source.probe(options.url()).await?;

        let cache_file = self
            .cache
            .path_for(options)
            .map_err(|e| JobError::write_failure(e.to_string()))?;

        if self.cache.contains(&cache_file).await {
            tracing::info!(cache_file = %cache_file.display(), "Cache hit");
            self.metrics.increment_cache_hit();
            return Ok((cache_file, true));
        }
        self.metrics.increment_cache_miss();

        // Removed on drop unless committed, also when the executor panics
        let staging = self.cache.stage(&cache_file);
        if info.is_image {
            tracing::info!(
                imagefile = %options.imagefile(),
                content_type = ?info.content_type,
                "Transform start"
            );
            self.metrics.increment_transform(self.executor.name());
            self.executor
                .transform(&self.source, options, &info, staging.path())
                .await?;
        } else {
            tracing::info!(
                imagefile = %options.imagefile(),
                content_type = ?info.content_type,
                "Direct download (non-image)"
            );
            self.metrics.increment_passthrough();
            self.source.download_to(options.url(), staging.path()).await?;
        }

        self.cache
            .commit(staging, &cache_file)
            .await
            .map_err(|e| JobError::write_failure(e.to_string()))?;

        Ok((cache_file, false))
    }
}

/// Delivers a job outcome exactly once.
///
/// If the job task ends without completing (panic or abort), the receiver
/// gets a 500 failure from `Drop` instead of a closed channel.
struct Completion {
    sender: Option<oneshot::Sender<JobOutcome>>,
    url: String,
}

impl Completion {
    fn new(sender: oneshot::Sender<JobOutcome>, url: String) -> Self {
        Self {
            sender: Some(sender),
            url,
        }
    }

    fn complete(&mut self, outcome: JobOutcome) {
        if let Some(sender) = self.sender.take() {
            // Receiver gone means the client disconnected
            let _ = sender.send(outcome);
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        let url = std::mem::take(&mut self.url);
        self.complete(JobOutcome::Failure(JobFailure {
            error: JobError::engine("job ended without an outcome"),
            url,
        }));
    }
}
