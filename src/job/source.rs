//! Remote source access: header probe, streaming fetch, pass-through download

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use super::JobError;

/// Result of a successful probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub is_image: bool,
    pub content_type: Option<String>,
}

impl SourceInfo {
    /// `image` anywhere in the primary type component counts as an image
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let is_image = content_type
            .and_then(|ct| ct.split('/').next())
            .map(|primary| primary.contains("image"))
            .unwrap_or(false);
        Self {
            is_image,
            content_type: content_type.map(str::to_string),
        }
    }
}

/// HTTP client shared by all jobs
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl SourceClient {
    pub fn new(probe_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            probe_timeout,
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Header-only request against the source.
    ///
    /// A locator without a host fails with `BadSource` before any network I/O.
    pub async fn probe(&self, url: &str) -> Result<SourceInfo, JobError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| JobError::bad_source(e.to_string()))?;
        if parsed.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(JobError::bad_source("locator has no host"));
        }

        let response = self
            .client
            .head(parsed)
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    JobError::SourceTimeout
                } else {
                    tracing::debug!(url = %url, error = %e, "Source probe failed");
                    JobError::unreachable(500)
                }
            })?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(JobError::unreachable(status));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());

        Ok(SourceInfo::from_content_type(content_type))
    }

    /// Start a GET and return the body as a byte stream.
    ///
    /// Any failure, including a non-success status, is reported as a 500.
    pub async fn open(
        &self,
        url: &str,
    ) -> Result<impl Stream<Item = Result<Bytes, reqwest::Error>>, JobError> {
        let response = self.get(url).await?;
        Ok(response.bytes_stream())
    }

    /// Fetch the whole body into memory, with its declared content type
    pub async fn fetch_bytes(&self, url: &str) -> Result<(Bytes, Option<String>), JobError> {
        let response = self.get(url).await?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(fetch_failed(url))?;
        Ok((body, content_type))
    }

    /// Copy the source bytes verbatim to `destination`
    pub async fn download_to(&self, url: &str, destination: &Path) -> Result<(), JobError> {
        let mut stream = Box::pin(self.open(url).await?);
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| JobError::write_failure(e.to_string()))?;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(fetch_failed(url))?;
            file.write_all(&chunk)
                .await
                .map_err(|e| JobError::write_failure(e.to_string()))?;
        }

        file.flush()
            .await
            .map_err(|e| JobError::write_failure(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, JobError> {
        self.client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_failed(url))
    }
}

fn fetch_failed(url: &str) -> impl Fn(reqwest::Error) -> JobError + '_ {
    move |e| {
        tracing::warn!(url = %url, error = %e, "Source fetch failed");
        JobError::unreachable(500)
    }
}
