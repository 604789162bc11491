// Metrics module - Prometheus-compatible job counters
// Atomic counters plus a few labelled maps, exported as Prometheus text

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Thread-safe counters for the request and job pipeline
pub struct Metrics {
    // HTTP requests by route and by response status
    request_count: AtomicU64,
    route_counts: Mutex<BTreeMap<String, u64>>,
    status_counts: Mutex<BTreeMap<u16, u64>>,

    // Job lifecycle
    jobs_started: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    passthrough_downloads: AtomicU64,
    transforms: Mutex<BTreeMap<String, u64>>,
    job_failures: Mutex<BTreeMap<String, u64>>,

    // Job duration, stored in microseconds
    job_duration_sum_us: AtomicU64,
    job_duration_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            route_counts: Mutex::new(BTreeMap::new()),
            status_counts: Mutex::new(BTreeMap::new()),
            jobs_started: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            passthrough_downloads: AtomicU64::new(0),
            transforms: Mutex::new(BTreeMap::new()),
            job_failures: Mutex::new(BTreeMap::new()),
            job_duration_sum_us: AtomicU64::new(0),
            job_duration_count: AtomicU64::new(0),
        }
    }

    /// Count an inbound request for `route`
    pub fn increment_request(&self, route: &str) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        increment_label(&self.route_counts, route.to_string());
    }

    pub fn increment_status_count(&self, status_code: u16) {
        if let Ok(mut counts) = self.status_counts.lock() {
            *counts.entry(status_code).or_insert(0) += 1;
        }
    }

    pub fn increment_job_started(&self) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_passthrough(&self) {
        self.passthrough_downloads.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a transform dispatched to `engine`
    pub fn increment_transform(&self, engine: &str) {
        increment_label(&self.transforms, engine.to_string());
    }

    /// Count a failed job by its status label (`404`, `500`, `ETIMEDOUT`, ...)
    pub fn increment_job_failure(&self, status: &str) {
        increment_label(&self.job_failures, status.to_string());
    }

    /// Record a job duration in milliseconds
    pub fn record_job_duration(&self, duration_ms: f64) {
        let duration_us = (duration_ms * 1000.0) as u64;
        self.job_duration_sum_us
            .fetch_add(duration_us, Ordering::Relaxed);
        self.job_duration_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn jobs_started(&self) -> u64 {
        self.jobs_started.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn passthrough_downloads(&self) -> u64 {
        self.passthrough_downloads.load(Ordering::Relaxed)
    }

    pub fn transform_count(&self, engine: &str) -> u64 {
        label_value(&self.transforms, engine)
    }

    pub fn job_failure_count(&self, status: &str) -> u64 {
        label_value(&self.job_failures, status)
    }

    /// Export all metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP http_requests_total Total number of HTTP requests received\n");
        output.push_str("# TYPE http_requests_total counter\n");
        output.push_str(&format!("http_requests_total {}\n", self.request_count()));

        output.push_str("\n# HELP http_requests_by_route_total HTTP requests by route\n");
        output.push_str("# TYPE http_requests_by_route_total counter\n");
        if let Ok(counts) = self.route_counts.lock() {
            for (route, count) in counts.iter() {
                output.push_str(&format!(
                    "http_requests_by_route_total{{route=\"{}\"}} {}\n",
                    route, count
                ));
            }
        }

        output.push_str("\n# HELP http_responses_by_status_total HTTP responses by status code\n");
        output.push_str("# TYPE http_responses_by_status_total counter\n");
        if let Ok(counts) = self.status_counts.lock() {
            for (status, count) in counts.iter() {
                output.push_str(&format!(
                    "http_responses_by_status_total{{status=\"{}\"}} {}\n",
                    status, count
                ));
            }
        }

        output.push_str("\n# HELP resize_jobs_started_total Transform jobs started\n");
        output.push_str("# TYPE resize_jobs_started_total counter\n");
        output.push_str(&format!("resize_jobs_started_total {}\n", self.jobs_started()));

        output.push_str("\n# HELP resize_cache_hits_total Jobs answered from the disk cache\n");
        output.push_str("# TYPE resize_cache_hits_total counter\n");
        output.push_str(&format!("resize_cache_hits_total {}\n", self.cache_hits()));

        output.push_str("\n# HELP resize_cache_misses_total Jobs that had to produce a cache file\n");
        output.push_str("# TYPE resize_cache_misses_total counter\n");
        output.push_str(&format!("resize_cache_misses_total {}\n", self.cache_misses()));

        output.push_str("\n# HELP resize_passthrough_total Non-image sources copied verbatim\n");
        output.push_str("# TYPE resize_passthrough_total counter\n");
        output.push_str(&format!(
            "resize_passthrough_total {}\n",
            self.passthrough_downloads()
        ));

        output.push_str("\n# HELP resize_transforms_total Transforms by backend\n");
        output.push_str("# TYPE resize_transforms_total counter\n");
        if let Ok(counts) = self.transforms.lock() {
            for (engine, count) in counts.iter() {
                output.push_str(&format!(
                    "resize_transforms_total{{engine=\"{}\"}} {}\n",
                    engine, count
                ));
            }
        }

        output.push_str("\n# HELP resize_job_failures_total Failed jobs by status\n");
        output.push_str("# TYPE resize_job_failures_total counter\n");
        if let Ok(counts) = self.job_failures.lock() {
            for (status, count) in counts.iter() {
                output.push_str(&format!(
                    "resize_job_failures_total{{status=\"{}\"}} {}\n",
                    status, count
                ));
            }
        }

        let sum_seconds = self.job_duration_sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        output.push_str("\n# HELP resize_job_duration_seconds Time spent running jobs\n");
        output.push_str("# TYPE resize_job_duration_seconds summary\n");
        output.push_str(&format!("resize_job_duration_seconds_sum {}\n", sum_seconds));
        output.push_str(&format!(
            "resize_job_duration_seconds_count {}\n",
            self.job_duration_count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn increment_label(map: &Mutex<BTreeMap<String, u64>>, label: String) {
    if let Ok(mut counts) = map.lock() {
        *counts.entry(label).or_insert(0) += 1;
    }
}

fn label_value(map: &Mutex<BTreeMap<String, u64>>, label: &str) -> u64 {
    map.lock()
        .ok()
        .and_then(|counts| counts.get(label).copied())
        .unwrap_or(0)
}
