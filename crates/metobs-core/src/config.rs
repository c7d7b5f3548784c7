use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable that overrides the sphere feed URL.
pub const FEED_URL_ENV: &str = "SPHERE_LIP_GEOJSON_FETCH";

const DEFAULT_PROJECT: &str = "The Living Ice Project";
const DEFAULT_FEED_URL: &str = "https://livingiceproject.com/static/shapes/spheres.geojson";
const DEFAULT_ASSET_BASE_URL: &str = "https://livingiceproject.com/static/spheres/";

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a summary of all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Panoramic sphere feed and navigation settings
    #[serde(default)]
    pub spheres: SpheresConfig,
}

/// Sphere feed, cache and navigation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpheresConfig {
    /// Project label attached to spheres that do not name one
    #[serde(default = "default_project")]
    pub project: String,

    /// GeoJSON FeatureCollection listing all spheres
    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    /// Base URL that relative panorama/thumbnail references are resolved against
    #[serde(default = "default_asset_base_url")]
    pub asset_base_url: String,

    /// How long a fetched feed and its matrix stay fresh
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Per-request timeout for the feed download
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Retries after the first failed feed request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Pause before retrying a failed background refresh
    #[serde(default = "default_refresh_backoff_secs")]
    pub refresh_backoff_secs: u64,

    /// Largest feed body accepted
    #[serde(default = "default_max_feed_bytes")]
    pub max_feed_bytes: usize,

    /// Neighbour search radius for panorama links, in meters
    #[serde(default = "default_max_range_m")]
    pub default_max_range_m: f64,

    /// Number of angular sectors used to pick panorama links
    #[serde(default = "default_sectors")]
    pub default_sectors: u32,

    /// Result count for nearest queries that do not specify one
    #[serde(default = "default_nearest_count")]
    pub default_nearest_count: usize,
}

fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("metobs")
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_asset_base_url() -> String {
    DEFAULT_ASSET_BASE_URL.to_string()
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_fetch_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_initial_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2000
}

fn default_max_range_m() -> f64 {
    10_000.0
}

fn default_sectors() -> u32 {
    30
}

fn default_refresh_backoff_secs() -> u64 {
    30
}

fn default_max_feed_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_nearest_count() -> usize {
    5
}

impl Default for SpheresConfig {
    fn default() -> Self {
        Self {
            project: default_project(),
            feed_url: default_feed_url(),
            asset_base_url: default_asset_base_url(),
            cache_ttl_secs: default_cache_ttl_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            refresh_backoff_secs: default_refresh_backoff_secs(),
            max_feed_bytes: default_max_feed_bytes(),
            default_max_range_m: default_max_range_m(),
            default_sectors: default_sectors(),
            default_nearest_count: default_nearest_count(),
        }
    }
}

impl SpheresConfig {
    pub fn cache_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_backoff(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_backoff_secs)
    }

    pub fn fetch_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            spheres: SpheresConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let mut config = Self::default();
            config.save()?;
            config.apply_env_overrides();
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated(path: Option<&Path>) -> Result<(Self, ValidationResult)> {
        let config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Apply environment variable overrides on top of file values
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(FEED_URL_ENV) {
            if !url.trim().is_empty() {
                tracing::debug!("Sphere feed URL overridden by {}", FEED_URL_ENV);
                self.spheres.feed_url = url.trim().to_string();
            }
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();
        let spheres = &self.spheres;

        Self::validate_url(&spheres.feed_url, "spheres.feed_url", &mut result);
        Self::validate_url(&spheres.asset_base_url, "spheres.asset_base_url", &mut result);

        if spheres.project.trim().is_empty() {
            result.add_warning("spheres.project", "Project label is empty");
        }

        if spheres.cache_ttl_secs == 0 {
            result.add_warning(
                "spheres.cache_ttl_secs",
                "Cache TTL is 0: every request will trigger a feed refresh",
            );
        } else if spheres.cache_ttl_secs > 86_400 {
            result.add_warning(
                "spheres.cache_ttl_secs",
                "Cache TTL is more than 24 hours",
            );
        }

        if spheres.fetch_timeout_secs == 0 {
            result.add_error(
                "spheres.fetch_timeout_secs",
                "Fetch timeout must be greater than 0",
            );
        } else if spheres.fetch_timeout_secs > 120 {
            result.add_warning(
                "spheres.fetch_timeout_secs",
                "Fetch timeout is unusually long (>120s)",
            );
        }

        if spheres.retry_initial_delay_ms > spheres.retry_max_delay_ms {
            result.add_warning(
                "spheres.retry_initial_delay_ms",
                "Initial retry delay exceeds the maximum delay",
            );
        }

        if !spheres.default_max_range_m.is_finite() || spheres.default_max_range_m < 0.0 {
            result.add_error(
                "spheres.default_max_range_m",
                "Range must be a finite, non-negative number of meters",
            );
        }

        if spheres.default_sectors == 0 {
            result.add_error("spheres.default_sectors", "Sector count must be at least 1");
        }

        if spheres.max_feed_bytes == 0 {
            result.add_error("spheres.max_feed_bytes", "Feed size limit must be greater than 0");
        }

        if spheres.default_nearest_count == 0 {
            result.add_error(
                "spheres.default_nearest_count",
                "Nearest count must be at least 1",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if let Some(port) = url.port() {
                    if port == 0 {
                        result.add_error(field_name, "Port cannot be 0");
                    }
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("metobs");

        Ok(config_dir.join("config.toml"))
    }
}
