// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::constants::{
    DEFAULT_ADDRESS, DEFAULT_CACHE_DIRECTORY, DEFAULT_CONVERT_COMMAND, DEFAULT_EXPIRES_SECS,
    DEFAULT_LOG_LEVEL, DEFAULT_MAX_AGE_SECS, DEFAULT_MAX_HEIGHT, DEFAULT_MAX_WIDTH, DEFAULT_PORT,
    DEFAULT_PROBE_TIMEOUT_SECS, DEFAULT_THREADS,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Blob storage name → base URL, used by `/media/{name}/...`
    #[serde(default)]
    pub blob_storage: BTreeMap<String, String>,
}

fn default_address() -> String {
    DEFAULT_ADDRESS.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_threads() -> usize {
    DEFAULT_THREADS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Worker threads for the HTTP service
    #[serde(default = "default_threads")]
    pub threads: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            threads: default_threads(),
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

fn default_convert_command() -> String {
    DEFAULT_CONVERT_COMMAND.to_string()
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

fn default_max_width() -> u32 {
    DEFAULT_MAX_WIDTH
}

fn default_max_height() -> u32 {
    DEFAULT_MAX_HEIGHT
}

/// Raster engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// External engine executable (ImageMagick `convert` or `magick`)
    #[serde(default = "default_convert_command")]
    pub convert_command: String,
    /// Timeout of the header-only source probe
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Output size limits of the native backend
    #[serde(default = "default_max_width")]
    pub max_width: u32,
    #[serde(default = "default_max_height")]
    pub max_height: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            convert_command: default_convert_command(),
            probe_timeout_secs: default_probe_timeout_secs(),
            max_width: default_max_width(),
            max_height: default_max_height(),
        }
    }
}

fn default_cache_directory() -> String {
    DEFAULT_CACHE_DIRECTORY.to_string()
}

fn default_max_age_secs() -> u64 {
    DEFAULT_MAX_AGE_SECS
}

fn default_expires_secs() -> u64 {
    DEFAULT_EXPIRES_SECS
}

/// Result cache location and client-side caching headers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_directory")]
    pub directory: String,
    /// `Cache-Control: public, max-age=...`
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
    /// Offset of the `Expires` header from the request time
    #[serde(default = "default_expires_secs")]
    pub expires_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_directory(),
            max_age_secs: default_max_age_secs(),
            expires_secs: default_expires_secs(),
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        let mut missing = None;
        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            })
        });

        if let Some(var_name) = missing {
            return Err(format!(
                "Environment variable '{}' is referenced but not set",
                var_name
            ));
        }

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.engine.convert_command.trim().is_empty() {
            return Err("engine.convert_command cannot be empty".to_string());
        }

        if self.engine.probe_timeout_secs == 0 {
            return Err("engine.probe_timeout_secs must be greater than 0".to_string());
        }

        if self.engine.max_width == 0 || self.engine.max_height == 0 {
            return Err("engine.max_width and engine.max_height must be greater than 0".to_string());
        }

        if self.cache.directory.trim().is_empty() {
            return Err("cache.directory cannot be empty".to_string());
        }

        if self.server.threads == 0 {
            return Err("server.threads must be greater than 0".to_string());
        }

        for (name, url) in &self.blob_storage {
            if name.is_empty() {
                return Err("blob_storage entry name cannot be empty".to_string());
            }
            if url.trim().is_empty() {
                return Err(format!("blob_storage '{}' has an empty URL", name));
            }
        }

        Ok(())
    }
}
