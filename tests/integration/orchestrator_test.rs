// Job orchestrator scenarios against a local HTTP source

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use resize_server::cache::DiskCache;
use resize_server::job::{
    FailureStatus, JobError, JobOutcome, Orchestrator, SourceClient, SourceInfo,
    TransformExecutor,
};
use resize_server::metrics::Metrics;
use resize_server::options::TransformOptions;
use tempfile::TempDir;

use super::support::{png_fixture, resize_options, Behavior, MockSource};

/// Executor that counts invocations and writes a fixed payload
struct CountingExecutor {
    calls: AtomicUsize,
}

impl CountingExecutor {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransformExecutor for CountingExecutor {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn transform(
        &self,
        _source: &SourceClient,
        _options: &TransformOptions,
        _info: &SourceInfo,
        destination: &Path,
    ) -> Result<(), JobError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(destination, b"transformed")
            .await
            .map_err(|e| JobError::write_failure(e.to_string()))
    }
}

/// Writes part of the output, then panics
struct PanickingExecutor;

#[async_trait]
impl TransformExecutor for PanickingExecutor {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn transform(
        &self,
        _source: &SourceClient,
        _options: &TransformOptions,
        _info: &SourceInfo,
        destination: &Path,
    ) -> Result<(), JobError> {
        tokio::fs::write(destination, b"partial").await.unwrap();
        panic!("engine crashed");
    }
}

struct Fixture {
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<Metrics>,
    cache_dir: TempDir,
}

fn fixture(executor: Arc<dyn TransformExecutor>, probe_timeout: Duration) -> Fixture {
    let cache_dir = TempDir::new().unwrap();
    let metrics = Arc::new(Metrics::new());
    let orchestrator = Orchestrator::new(
        SourceClient::new(probe_timeout).unwrap(),
        DiskCache::new(cache_dir.path()),
        executor,
        Arc::clone(&metrics),
    );
    Fixture {
        orchestrator: Arc::new(orchestrator),
        metrics,
        cache_dir,
    }
}

fn cache_entries(dir: &TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_probe_404_fails_with_status() {
    let source = MockSource::start(HashMap::new()).await;
    let executor = Arc::new(CountingExecutor::new());
    let fx = fixture(executor.clone(), Duration::from_secs(5));
    let url = source.url("/missing.png");

    match fx.orchestrator.run(&resize_options(&url, 100, 100, "png")).await {
        JobOutcome::Failure(failure) => {
            assert_eq!(failure.status(), FailureStatus::Code(404));
            assert_eq!(failure.url, url);
            assert_eq!(failure.to_json(), format!(r#"{{"status":404,"url":"{}"}}"#, url));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(executor.calls(), 0);
    assert_eq!(fx.metrics.job_failure_count("404"), 1);
    assert!(cache_entries(&fx.cache_dir).is_empty());
}

#[tokio::test]
async fn test_probe_timeout_reports_token() {
    let mut routes = HashMap::new();
    routes.insert("/slow.png".to_string(), Behavior::Hang);
    let source = MockSource::start(routes).await;
    let fx = fixture(Arc::new(CountingExecutor::new()), Duration::from_millis(300));

    match fx
        .orchestrator
        .run(&resize_options(&source.url("/slow.png"), 100, 100, "png"))
        .await
    {
        JobOutcome::Failure(failure) => {
            assert_eq!(failure.status(), FailureStatus::Timeout);
            assert_eq!(failure.error.to_http_status(), 504);
            assert!(failure.to_json().contains(r#""status":"ETIMEDOUT""#));
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert_eq!(fx.metrics.job_failure_count("ETIMEDOUT"), 1);
}

#[tokio::test]
async fn test_non_image_is_copied_verbatim() {
    let page = b"<html><body>not an image</body></html>".to_vec();
    let mut routes = HashMap::new();
    routes.insert(
        "/page.html".to_string(),
        Behavior::ok("text/html; charset=utf-8", page.clone()),
    );
    let source = MockSource::start(routes).await;
    let executor = Arc::new(CountingExecutor::new());
    let fx = fixture(executor.clone(), Duration::from_secs(5));

    let outcome = fx
        .orchestrator
        .run(&resize_options(&source.url("/page.html"), 100, 100, "png"))
        .await;

    let JobOutcome::Success {
        cache_file,
        cache_hit,
    } = outcome
    else {
        panic!("expected success, got {:?}", outcome);
    };
    assert!(!cache_hit);
    assert_eq!(std::fs::read(&cache_file).unwrap(), page);
    assert_eq!(executor.calls(), 0);
    assert_eq!(fx.metrics.passthrough_downloads(), 1);
    assert_eq!(fx.metrics.transform_count("counting"), 0);
}

#[tokio::test]
async fn test_cache_hit_skips_engine() {
    let mut routes = HashMap::new();
    routes.insert("/a.png".to_string(), Behavior::ok("image/png", png_fixture(32, 32)));
    let source = MockSource::start(routes).await;
    let executor = Arc::new(CountingExecutor::new());
    let fx = fixture(executor.clone(), Duration::from_secs(5));
    let options = resize_options(&source.url("/a.png"), 16, 16, "png");

    let first = fx.orchestrator.run(&options).await;
    let second = fx.orchestrator.run(&options).await;

    let (
        JobOutcome::Success {
            cache_file: first_file,
            cache_hit: false,
        },
        JobOutcome::Success {
            cache_file: second_file,
            cache_hit: true,
        },
    ) = (&first, &second)
    else {
        panic!("unexpected outcomes: {:?} / {:?}", first, second);
    };
    assert_eq!(first_file, second_file);
    assert_eq!(executor.calls(), 1);
    assert_eq!(source.request_count("HEAD", "/a.png"), 2);
    assert_eq!(fx.metrics.cache_hits(), 1);
    assert_eq!(fx.metrics.cache_misses(), 1);

    // Only the committed file remains; no staging leftovers
    assert_eq!(cache_entries(&fx.cache_dir).len(), 1);
}

#[tokio::test]
async fn test_distinct_options_get_distinct_files() {
    let mut routes = HashMap::new();
    routes.insert("/a.png".to_string(), Behavior::ok("image/png", png_fixture(32, 32)));
    let source = MockSource::start(routes).await;
    let executor = Arc::new(CountingExecutor::new());
    let fx = fixture(executor.clone(), Duration::from_secs(5));
    let url = source.url("/a.png");

    assert!(fx.orchestrator.run(&resize_options(&url, 16, 16, "png")).await.is_success());
    assert!(fx.orchestrator.run(&resize_options(&url, 8, 8, "png")).await.is_success());
    assert!(fx.orchestrator.run(&resize_options(&url, 16, 16, "webp")).await.is_success());

    assert_eq!(executor.calls(), 3);
    let mut entries = cache_entries(&fx.cache_dir);
    entries.sort();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries.iter().filter(|e| e.ends_with(".webp")).count(), 1);
}

#[tokio::test]
async fn test_submit_delivers_exactly_one_outcome() {
    let mut routes = HashMap::new();
    routes.insert("/a.png".to_string(), Behavior::ok("image/png", png_fixture(8, 8)));
    let source = MockSource::start(routes).await;
    let fx = fixture(Arc::new(CountingExecutor::new()), Duration::from_secs(5));

    let rx = Arc::clone(&fx.orchestrator).submit(resize_options(&source.url("/a.png"), 4, 4, "png"));
    let outcome = tokio::time::timeout(Duration::from_secs(10), rx)
        .await
        .expect("job did not complete")
        .expect("job dropped its outcome");
    assert!(outcome.is_success());
    assert_eq!(fx.metrics.jobs_started(), 1);
}

#[tokio::test]
async fn test_panicking_engine_still_completes_job() {
    let mut routes = HashMap::new();
    routes.insert("/a.png".to_string(), Behavior::ok("image/png", png_fixture(8, 8)));
    let source = MockSource::start(routes).await;
    let fx = fixture(Arc::new(PanickingExecutor), Duration::from_secs(5));
    let url = source.url("/a.png");

    let rx = Arc::clone(&fx.orchestrator).submit(resize_options(&url, 4, 4, "png"));
    match rx.await.expect("job dropped its outcome") {
        JobOutcome::Failure(failure) => {
            assert_eq!(failure.status(), FailureStatus::Code(500));
            assert_eq!(failure.url, url);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    // The partial staging file went away with the job task
    assert!(cache_entries(&fx.cache_dir).is_empty());
}

#[tokio::test]
async fn test_hostless_locator_skips_network() {
    let fx = fixture(Arc::new(CountingExecutor::new()), Duration::from_secs(5));
    let options = TransformOptions::builder()
        .width(Some(10))
        .format("jpg")
        .imagefile("file:///etc/passwd")
        .build()
        .unwrap();

    match fx.orchestrator.run(&options).await {
        JobOutcome::Failure(failure) => {
            assert_eq!(failure.status(), FailureStatus::Code(400));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}
