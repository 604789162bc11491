// Error types module

use thiserror::Error;

/// Startup and boundary errors of the server
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid YAML, missing env vars, failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging error: {0}")]
    Logging(String),

    /// Cache directory could not be prepared
    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    /// HTTP client for source fetches could not be built
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    pub fn to_http_status(&self) -> u16 {
        500
    }
}
