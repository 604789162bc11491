// Proxy module - Pingora ProxyHttp implementation
// Every request is answered in request_filter; nothing is forwarded upstream.

pub mod helpers;
pub mod special_endpoints;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use pingora_core::upstreams::peer::HttpPeer;
use pingora_core::Result;
use pingora_http::ResponseHeader;
use pingora_proxy::{ProxyHttp, Session};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;

use crate::cache::DiskCache;
use crate::config::Config;
use crate::constants::RESPONSE_CHUNK_SIZE;
use crate::error::ServerError;
use crate::job::{
    DimensionLimits, ExternalEngine, JobError, JobFailure, JobOutcome, NativeEngine, Orchestrator,
    SourceClient,
};
use crate::metrics::Metrics;
use crate::options::{decode_legacy_path, decode_query_params, resolve_blob_url, TransformOptions};
use crate::router::{parse_query, route, Route};

use helpers::{boundary_status, cache_control_header, content_type_for, expires_header};
use special_endpoints::{
    handle_health, handle_invalid_format, handle_metrics, handle_not_found, handle_unknown_blob,
    EndpointResponse,
};

/// Response payload
#[derive(Debug)]
pub enum ResponseBody {
    Full(Bytes),
    /// Opened cache file, streamed in chunks
    File { file: tokio::fs::File, len: u64 },
}

impl ResponseBody {
    pub fn len(&self) -> u64 {
        match self {
            Self::Full(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Next chunk of at most `chunk_size` bytes, `None` at end of file
pub async fn read_chunk(file: &mut tokio::fs::File, chunk_size: usize) -> std::io::Result<Option<Bytes>> {
    let mut buffer = BytesMut::with_capacity(chunk_size);
    if file.read_buf(&mut buffer).await? == 0 {
        return Ok(None);
    }
    Ok(Some(buffer.freeze()))
}

/// Fully built response, written to the session by `request_filter`
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: ResponseBody,
}

impl ProxyResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

impl From<EndpointResponse> for ProxyResponse {
    fn from(response: EndpointResponse) -> Self {
        Self {
            status: response.status,
            headers: vec![("Content-Type", response.content_type.to_string())],
            body: ResponseBody::Full(Bytes::from(response.body)),
        }
    }
}

/// Per-request state
pub struct RequestContext {
    request_id: String,
    started: Instant,
    route: &'static str,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            started: Instant::now(),
            route: "unrouted",
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Image transformation server on top of Pingora.
///
/// Legacy paths run on the external engine, blob-storage media paths on the
/// native one. Both share the disk cache, the source client and the metrics.
pub struct ResizeProxy {
    config: Arc<Config>,
    metrics: Arc<Metrics>,
    legacy: Arc<Orchestrator>,
    media: Arc<Orchestrator>,
}

impl ResizeProxy {
    pub fn new(config: Config) -> std::result::Result<Self, ServerError> {
        let metrics = Arc::new(Metrics::new());
        let source = SourceClient::new(Duration::from_secs(config.engine.probe_timeout_secs))?;
        let cache = DiskCache::new(&config.cache.directory);

        let legacy = Orchestrator::new(
            source.clone(),
            cache.clone(),
            Arc::new(ExternalEngine::new(&config.engine.convert_command)),
            Arc::clone(&metrics),
        );
        let limits = DimensionLimits {
            max_width: config.engine.max_width,
            max_height: config.engine.max_height,
        };
        let media = Orchestrator::new(
            source,
            cache,
            Arc::new(NativeEngine::new(limits)),
            Arc::clone(&metrics),
        );

        Ok(Self {
            config: Arc::new(config),
            metrics,
            legacy: Arc::new(legacy),
            media: Arc::new(media),
        })
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }

    /// Produce the response for one request without touching the session.
    pub async fn handle(&self, method: &str, path: &str, query: Option<&str>) -> ProxyResponse {
        self.dispatch(route(method, path), path, query).await
    }

    /// Produce the response for an already routed request
    pub async fn dispatch(&self, route: Route, path: &str, query: Option<&str>) -> ProxyResponse {
        self.metrics.increment_request(route.label());

        match route {
            Route::Health => handle_health().into(),
            Route::Metrics => handle_metrics(&self.metrics).into(),
            Route::NotFound => handle_not_found().into(),
            Route::Media { blob, image_path } => {
                let Some(base) = self.config.blob_storage.get(&blob) else {
                    return handle_unknown_blob(&blob).into();
                };
                let full_url = resolve_blob_url(base, &image_path);
                match decode_query_params(&parse_query(query), &full_url, &image_path) {
                    Ok(options) => self.run_job(&self.media, options).await,
                    Err(e) => {
                        tracing::debug!(error = %e, "Rejected media request");
                        handle_invalid_format().into()
                    }
                }
            }
            Route::Legacy => match decode_legacy_path(path, &parse_query(query)) {
                Ok(options) => self.run_job(&self.legacy, options).await,
                Err(e) => {
                    tracing::debug!(error = %e, status = e.to_http_status(), "Rejected legacy request");
                    handle_invalid_format().into()
                }
            },
        }
    }

    async fn run_job(&self, orchestrator: &Arc<Orchestrator>, options: TransformOptions) -> ProxyResponse {
        let started = Instant::now();
        let url = options.url().to_string();

        let outcome = Arc::clone(orchestrator)
            .submit(options)
            .await
            .unwrap_or_else(|_| {
                JobOutcome::Failure(JobFailure {
                    error: JobError::engine("job outcome channel closed"),
                    url: url.clone(),
                })
            });

        match outcome {
            JobOutcome::Success {
                cache_file,
                cache_hit,
            } => {
                let opened = match tokio::fs::File::open(&cache_file).await {
                    Ok(file) => file.metadata().await.map(|meta| (file, meta.len())),
                    Err(e) => Err(e),
                };
                let (file, len) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        tracing::error!(
                            cache_file = %cache_file.display(),
                            error = %e,
                            "Failed to open cache file"
                        );
                        return failure_response(&JobFailure {
                            error: JobError::write_failure(e.to_string()),
                            url,
                        });
                    }
                };

                let duration_ms = if cache_hit {
                    0
                } else {
                    started.elapsed().as_millis()
                };
                let cache = &self.config.cache;

                ProxyResponse {
                    status: 200,
                    headers: vec![
                        ("Content-Type", content_type_for(&cache_file).to_string()),
                        ("Cache-Control", cache_control_header(cache.max_age_secs)),
                        ("Expires", expires_header(chrono::Utc::now(), cache.expires_secs)),
                        ("X-ResizeJobDuration", duration_ms.to_string()),
                    ],
                    body: ResponseBody::File { file, len },
                }
            }
            JobOutcome::Failure(failure) => failure_response(&failure),
        }
    }
}

/// `{"status": <code|"ETIMEDOUT">, "url": "..."}` with the mapped HTTP status
fn failure_response(failure: &JobFailure) -> ProxyResponse {
    ProxyResponse {
        status: boundary_status(failure.error.to_http_status()),
        headers: vec![("Content-Type", "application/json".to_string())],
        body: ResponseBody::Full(Bytes::from(failure.to_json())),
    }
}

#[async_trait]
impl ProxyHttp for ResizeProxy {
    type CTX = RequestContext;

    fn new_ctx(&self) -> Self::CTX {
        RequestContext::new()
    }

    /// Never reached: request_filter always answers the request
    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> Result<Box<HttpPeer>> {
        Err(pingora_core::Error::explain(
            pingora_core::ErrorType::InternalError,
            "resize-server has no upstream peer",
        ))
    }

    async fn request_filter(&self, session: &mut Session, ctx: &mut Self::CTX) -> Result<bool> {
        let (method, path, query) = {
            let req = session.req_header();
            (
                req.method.as_str().to_string(),
                req.uri.path().to_string(),
                req.uri.query().map(str::to_string),
            )
        };
        let route = route(&method, &path);
        ctx.route = route.label();

        tracing::debug!(
            request_id = %ctx.request_id(),
            method = %method,
            path = %path,
            "Handling request"
        );

        let response = self.dispatch(route, &path, query.as_deref()).await;

        let mut header = ResponseHeader::build(response.status, None)?;
        for (name, value) in &response.headers {
            header.insert_header(*name, value.as_str())?;
        }
        header.insert_header("Content-Length", response.body.len().to_string())?;

        session
            .write_response_header(Box::new(header), false)
            .await?;

        match response.body {
            ResponseBody::Full(bytes) => session.write_response_body(Some(bytes), true).await?,
            ResponseBody::File { mut file, .. } => loop {
                let chunk = read_chunk(&mut file, RESPONSE_CHUNK_SIZE)
                    .await
                    .map_err(|e| {
                        pingora_core::Error::because(
                            pingora_core::ErrorType::InternalError,
                            "reading cache file",
                            e,
                        )
                    })?;
                match chunk {
                    Some(chunk) => session.write_response_body(Some(chunk), false).await?,
                    None => {
                        session.write_response_body(None, true).await?;
                        break;
                    }
                }
            },
        }

        Ok(true)
    }

    async fn logging(
        &self,
        session: &mut Session,
        _e: Option<&pingora_core::Error>,
        ctx: &mut Self::CTX,
    ) {
        let status_code = session
            .response_written()
            .map(|resp| resp.status.as_u16())
            .unwrap_or(500);

        self.metrics.increment_status_count(status_code);

        tracing::info!(
            request_id = %ctx.request_id(),
            route = ctx.route,
            status = status_code,
            duration_ms = ctx.started.elapsed().as_millis() as u64,
            "Request completed"
        );
    }
}
