// Constants module - centralized default values for configuration
//
// Every default used by the config layer and the job pipeline lives here so
// the numbers can be changed in one place.

// =============================================================================
// Server defaults
// =============================================================================

/// Default listen address
pub const DEFAULT_ADDRESS: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 5060;

/// Default number of worker threads
pub const DEFAULT_THREADS: usize = 4;

// =============================================================================
// Engine defaults
// =============================================================================

/// Default external raster engine executable
pub const DEFAULT_CONVERT_COMMAND: &str = "convert";

/// Timeout for the header-only probe of the remote source, in seconds
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Largest output width the native backend will render
pub const DEFAULT_MAX_WIDTH: u32 = 4096;

/// Largest output height the native backend will render
pub const DEFAULT_MAX_HEIGHT: u32 = 4096;

// =============================================================================
// Transform defaults
// =============================================================================

/// Quality used when the request has none or an unparsable one
pub const DEFAULT_QUALITY: u8 = 80;

/// Output format of the legacy URL scheme when none is given
pub const DEFAULT_LEGACY_FORMAT: &str = "jpg";

/// Output format of the query-parameter scheme when none is given
pub const DEFAULT_QUERY_FORMAT: &str = "png";

/// Sentinel telling the external engine to use stdin/stdout
pub const STDIO_SENTINEL: &str = "-";

// =============================================================================
// Cache defaults
// =============================================================================

/// Default cache directory
pub const DEFAULT_CACHE_DIRECTORY: &str = "./cache";

/// Default `Cache-Control: max-age` for served files (~3.6 days)
pub const DEFAULT_MAX_AGE_SECS: u64 = 315_360;

/// Default offset of the `Expires` header from the request time (14 days)
pub const DEFAULT_EXPIRES_SECS: u64 = 1_209_600;

/// Read size when streaming a cache file to the client
pub const RESPONSE_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Logging defaults
// =============================================================================

/// Default log level when `RUST_LOG` is not set
pub const DEFAULT_LOG_LEVEL: &str = "info";
