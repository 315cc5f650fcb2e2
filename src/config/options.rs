use std::time::Duration;

use crate::core::{MatrixError, Result};

/// Service tuning
///
/// Built with chained setters, or read from `MATRIX_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOptions {
    /// Time a cached query result stays valid
    pub cache_ttl: Duration,

    /// Maximum number of cached query results
    pub cache_max_entries: usize,

    /// Rows/columns fetched per page
    pub page_size: usize,

    /// Above this many cells (rows x columns) junctions load with one broad query
    pub bulk_threshold: usize,

    /// Identifiers per `in` filter when loading junctions in batches
    pub id_chunk_size: usize,

    /// Longest request URL the platform accepts
    pub max_url_length: usize,

    /// Web API root the rendered queries are sent to
    pub base_url: String,

    /// Publisher prefix applied to logical names that do not carry it
    pub publisher_prefix: Option<String>,

    /// Record call counts and durations per operation
    pub enable_performance_tracking: bool,

    /// Emit per-query debug events
    pub debug_mode: bool,
}

impl ServiceOptions {
    pub fn new() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300), // 5 minutes
            cache_max_entries: 500,
            page_size: 50,
            bulk_threshold: 2_500,
            id_chunk_size: 50,
            max_url_length: 8_192,
            base_url: "https://localhost/api/data/v9.2".to_string(),
            publisher_prefix: None,
            enable_performance_tracking: true,
            debug_mode: false,
        }
    }

    /// Defaults overridden by `MATRIX_*` environment variables.
    pub fn from_env() -> Self {
        let mut options = Self::new();

        if let Some(secs) = env_parse::<u64>("MATRIX_CACHE_TTL_SECS") {
            options.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(entries) = env_parse("MATRIX_CACHE_MAX_ENTRIES") {
            options.cache_max_entries = entries;
        }
        if let Some(size) = env_parse("MATRIX_PAGE_SIZE") {
            options.page_size = size;
        }
        if let Some(threshold) = env_parse("MATRIX_BULK_THRESHOLD") {
            options.bulk_threshold = threshold;
        }
        if let Some(chunk) = env_parse("MATRIX_ID_CHUNK_SIZE") {
            options.id_chunk_size = chunk;
        }
        if let Some(limit) = env_parse("MATRIX_MAX_URL_LENGTH") {
            options.max_url_length = limit;
        }
        if let Ok(url) = std::env::var("MATRIX_BASE_URL") {
            options.base_url = url;
        }
        if let Ok(prefix) = std::env::var("MATRIX_PUBLISHER_PREFIX") {
            options.publisher_prefix = Some(prefix);
        }
        if let Some(debug) = env_flag("MATRIX_DEBUG") {
            options.debug_mode = debug;
        }
        if let Some(tracking) = env_flag("MATRIX_PERFORMANCE_TRACKING") {
            options.enable_performance_tracking = tracking;
        }

        options
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn cache_max_entries(mut self, max: usize) -> Self {
        self.cache_max_entries = max;
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn bulk_threshold(mut self, cells: usize) -> Self {
        self.bulk_threshold = cells;
        self
    }

    pub fn id_chunk_size(mut self, size: usize) -> Self {
        self.id_chunk_size = size;
        self
    }

    pub fn max_url_length(mut self, limit: usize) -> Self {
        self.max_url_length = limit;
        self
    }

    pub fn base_url(mut self, url: &str) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn publisher_prefix(mut self, prefix: &str) -> Self {
        self.publisher_prefix = Some(prefix.to_string());
        self
    }

    pub fn performance_tracking(mut self, enabled: bool) -> Self {
        self.enable_performance_tracking = enabled;
        self
    }

    pub fn debug_mode(mut self, enabled: bool) -> Self {
        self.debug_mode = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(MatrixError::configuration("page_size must be > 0"));
        }

        if self.cache_max_entries == 0 {
            return Err(MatrixError::configuration("cache_max_entries must be > 0"));
        }

        if self.id_chunk_size == 0 {
            return Err(MatrixError::configuration("id_chunk_size must be > 0"));
        }

        if self.base_url.is_empty() {
            return Err(MatrixError::configuration("base_url cannot be empty"));
        }

        if self.max_url_length <= self.base_url.len() {
            return Err(MatrixError::configuration(
                "max_url_length must exceed the base URL length",
            ));
        }

        Ok(())
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self::new()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|v| parse_flag(&v))
}

/// `true`/`false`, `1`/`0`, `yes`/`no` and `on`/`off`, case-insensitive.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
