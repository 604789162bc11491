// Resize Server Library
// Image transformation proxy: decode the request, run a job, serve the cached result

pub mod cache;
pub mod command;
pub mod config;
pub mod constants;
pub mod error;
pub mod job;
pub mod logging;
pub mod metrics;
pub mod options;
pub mod proxy;
pub mod router;
