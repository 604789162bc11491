// Native pipeline end to end on generated images

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use resize_server::cache::DiskCache;
use resize_server::job::{FailureStatus, JobOutcome, NativeEngine, Orchestrator, SourceClient};
use resize_server::metrics::Metrics;
use resize_server::options::{decode_query_params, TransformOptions};
use tempfile::TempDir;

use super::support::{png_fixture, Behavior, MockSource};

fn orchestrator(cache_dir: &TempDir) -> Orchestrator {
    Orchestrator::new(
        SourceClient::new(Duration::from_secs(5)).unwrap(),
        DiskCache::new(cache_dir.path()),
        Arc::new(NativeEngine::default()),
        Arc::new(Metrics::new()),
    )
}

fn media_options(url: &str, query: &[(&str, &str)]) -> TransformOptions {
    let query: BTreeMap<String, String> = query
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    decode_query_params(&query, url, "photo.png").unwrap()
}

async fn source_with_png(width: u32, height: u32) -> MockSource {
    let mut routes = HashMap::new();
    routes.insert(
        "/photo.png".to_string(),
        Behavior::ok("image/png", png_fixture(width, height)),
    );
    MockSource::start(routes).await
}

async fn run_to_image(
    orchestrator: &Orchestrator,
    options: &TransformOptions,
) -> (std::path::PathBuf, image::DynamicImage) {
    match orchestrator.run(options).await {
        JobOutcome::Success { cache_file, .. } => {
            let img = image::open(&cache_file).unwrap();
            (cache_file, img)
        }
        JobOutcome::Failure(failure) => panic!("job failed: {:?}", failure),
    }
}

#[tokio::test]
async fn test_crop_produces_exact_box() {
    let source = source_with_png(120, 60).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(&source.url("/photo.png"), &[("s", "c40x40"), ("f", "png")]);

    let (_, img) = run_to_image(&orchestrator, &options).await;
    assert_eq!((img.width(), img.height()), (40, 40));
}

#[tokio::test]
async fn test_scale_ignores_aspect() {
    let source = source_with_png(120, 60).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(&source.url("/photo.png"), &[("s", "30x90")]);

    let (_, img) = run_to_image(&orchestrator, &options).await;
    assert_eq!((img.width(), img.height()), (30, 90));
}

#[tokio::test]
async fn test_single_dimension_keeps_aspect() {
    let source = source_with_png(120, 60).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(&source.url("/photo.png"), &[("s", "w60")]);

    let (_, img) = run_to_image(&orchestrator, &options).await;
    assert_eq!((img.width(), img.height()), (60, 30));
}

#[tokio::test]
async fn test_jpeg_output() {
    let source = source_with_png(64, 64).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(
        &source.url("/photo.png"),
        &[("s", "32x32"), ("f", "jpg"), ("q", "60")],
    );

    let (cache_file, img) = run_to_image(&orchestrator, &options).await;
    assert!(cache_file.to_string_lossy().ends_with(".jpg"));
    assert_eq!((img.width(), img.height()), (32, 32));
    let bytes = std::fs::read(&cache_file).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[tokio::test]
async fn test_undecodable_image_fails_with_500() {
    let mut routes = HashMap::new();
    routes.insert(
        "/photo.png".to_string(),
        Behavior::ok("image/png", b"definitely not a png".to_vec()),
    );
    let source = MockSource::start(routes).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(&source.url("/photo.png"), &[("s", "10x10")]);

    match orchestrator.run(&options).await {
        JobOutcome::Failure(failure) => assert_eq!(failure.status(), FailureStatus::Code(500)),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_oversized_request_rejected_before_fetch() {
    let source = source_with_png(120, 60).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(&source.url("/photo.png"), &[("s", "60000x60000")]);

    match orchestrator.run(&options).await {
        JobOutcome::Failure(failure) => assert_eq!(failure.status(), FailureStatus::Code(500)),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(source.request_count("GET", "/photo.png"), 0);
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_generic_format_token_is_encoded() {
    let source = source_with_png(120, 60).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&cache_dir);
    let options = media_options(&source.url("/photo.png"), &[("s", "w30"), ("f", "bmp")]);

    let (cache_file, img) = run_to_image(&orchestrator, &options).await;
    assert!(cache_file.to_string_lossy().ends_with(".bmp"));
    assert_eq!((img.width(), img.height()), (30, 15));
}
