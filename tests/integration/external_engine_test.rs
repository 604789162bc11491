// External engine pipeline against a shell-script stand-in for the engine

#![cfg(unix)]

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use resize_server::cache::DiskCache;
use resize_server::job::{ExternalEngine, FailureStatus, JobOutcome, Orchestrator, SourceClient};
use resize_server::metrics::Metrics;
use resize_server::options::decode_legacy_path;
use tempfile::TempDir;

use super::support::{png_fixture, Behavior, MockSource};

/// Write an executable script and return its path
fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

fn orchestrator(engine: &Path, cache_dir: &Path) -> Orchestrator {
    Orchestrator::new(
        SourceClient::new(Duration::from_secs(5)).unwrap(),
        DiskCache::new(cache_dir),
        Arc::new(ExternalEngine::new(engine.to_string_lossy())),
        Arc::new(Metrics::new()),
    )
}

#[tokio::test]
async fn test_engine_output_lands_in_cache() {
    let image = png_fixture(24, 24);
    let mut routes = HashMap::new();
    routes.insert("/img.png".to_string(), Behavior::ok("image/png", image.clone()));
    let source = MockSource::start(routes).await;

    let tools = TempDir::new().unwrap();
    let args_file = tools.path().join("args.txt");
    let engine = write_script(
        tools.path(),
        "fake-convert",
        &format!("#!/bin/sh\necho \"$@\" > {}\ncat\n", args_file.display()),
    );
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&engine, cache_dir.path());

    let path = format!("/c10x10n/png,75/{}", source.url("/img.png"));
    let options = decode_legacy_path(&path, &Default::default()).unwrap();

    let JobOutcome::Success { cache_file, .. } = orchestrator.run(&options).await else {
        panic!("expected success");
    };
    assert_eq!(std::fs::read(&cache_file).unwrap(), image);
    assert!(cache_file.to_string_lossy().ends_with(".png"));

    let args = std::fs::read_to_string(&args_file).unwrap();
    assert_eq!(
        args.trim(),
        "- -thumbnail 10x10^> -gravity North -crop 10x10+0+0 +repage -quality 75 -background white -flatten png:-"
    );
}

#[tokio::test]
async fn test_engine_failure_leaves_no_cache_file() {
    let mut routes = HashMap::new();
    routes.insert("/img.png".to_string(), Behavior::ok("image/png", png_fixture(8, 8)));
    let source = MockSource::start(routes).await;

    let tools = TempDir::new().unwrap();
    let engine = write_script(
        tools.path(),
        "broken-convert",
        "#!/bin/sh\ncat > /dev/null\necho 'convert: no decode delegate' >&2\nexit 1\n",
    );
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&engine, cache_dir.path());

    let path = format!("/200/{}", source.url("/img.png"));
    let options = decode_legacy_path(&path, &Default::default()).unwrap();

    match orchestrator.run(&options).await {
        JobOutcome::Failure(failure) => {
            assert_eq!(failure.status(), FailureStatus::Code(500));
            assert_eq!(failure.url, source.url("/img.png"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_missing_engine_binary_fails() {
    let mut routes = HashMap::new();
    routes.insert("/img.png".to_string(), Behavior::ok("image/png", png_fixture(8, 8)));
    let source = MockSource::start(routes).await;
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(Path::new("/nonexistent/convert"), cache_dir.path());

    let path = format!("/w100/{}", source.url("/img.png"));
    let options = decode_legacy_path(&path, &Default::default()).unwrap();

    let outcome = orchestrator.run(&options).await;
    assert!(!outcome.is_success());
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}

fn process_alive(pid: &str) -> bool {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("kill -0 {} 2>/dev/null", pid))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn test_engine_killed_when_fetch_fails() {
    let mut routes = HashMap::new();
    routes.insert(
        "/img.png".to_string(),
        Behavior::ProbeOnly {
            content_type: "image/png",
            get_delay: Duration::from_millis(300),
        },
    );
    let source = MockSource::start(routes).await;

    let tools = TempDir::new().unwrap();
    let pid_file = tools.path().join("engine.pid");
    // Records its pid, then waits on stdin forever
    let engine = write_script(
        tools.path(),
        "stalled-convert",
        &format!("#!/bin/sh\necho $$ > {}\nexec cat\n", pid_file.display()),
    );
    let cache_dir = TempDir::new().unwrap();
    let orchestrator = orchestrator(&engine, cache_dir.path());

    let path = format!("/c10x10n/png,75/{}", source.url("/img.png"));
    let options = decode_legacy_path(&path, &Default::default()).unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(10), orchestrator.run(&options))
        .await
        .expect("job hung on the engine");
    match outcome {
        JobOutcome::Failure(failure) => {
            assert_eq!(failure.status(), FailureStatus::Code(500));
            assert_eq!(failure.url, source.url("/img.png"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(source.request_count("GET", "/img.png"), 1);

    let pid = std::fs::read_to_string(&pid_file).unwrap();
    assert!(!process_alive(pid.trim()), "engine process {} still running", pid.trim());
    assert_eq!(std::fs::read_dir(cache_dir.path()).unwrap().count(), 0);
}
