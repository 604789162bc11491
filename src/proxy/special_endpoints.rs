//! Response generators for endpoints that do not run a job:
//! - `/health` - liveness probe
//! - `/metrics` - Prometheus metrics export
//! - routing and decoding errors
//!
//! # Design
//!
//! Functions return `EndpointResponse` instead of writing directly to the
//! session, which keeps them testable without a live connection.

use crate::metrics::Metrics;

/// Response from a special endpoint handler.
#[derive(Debug, Clone)]
pub struct EndpointResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl EndpointResponse {
    /// Create a JSON response with the given status and body.
    pub fn json(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: "application/json",
            body,
        }
    }

    /// Create a plain text response (for Prometheus metrics).
    pub fn prometheus(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/plain; version=0.0.4",
            body,
        }
    }

    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            body: body.into(),
        }
    }

    /// `{"status": <status>, "message": "..."}`
    pub fn error(status: u16, message: impl Into<String>) -> Self {
        let body = serde_json::json!({
            "status": status,
            "message": message.into(),
        })
        .to_string();
        Self::json(status, body)
    }
}

pub fn handle_health() -> EndpointResponse {
    EndpointResponse::text(200, "OK")
}

pub fn handle_metrics(metrics: &Metrics) -> EndpointResponse {
    EndpointResponse::prometheus(metrics.export_prometheus())
}

pub fn handle_unknown_blob(name: &str) -> EndpointResponse {
    EndpointResponse::error(404, format!("Blob storage '{}' not found.", name))
}

pub fn handle_invalid_format() -> EndpointResponse {
    EndpointResponse::error(400, "Invalid request format")
}

pub fn handle_not_found() -> EndpointResponse {
    EndpointResponse::error(404, "Not found")
}
