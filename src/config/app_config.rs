//! Application Configuration - every tunable as a TOML value
//!
//! Each struct implements `Default` with the reference values from
//! `config::defaults`, so a missing or partial file behaves like the
//! built-in configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable pointing at a TOML config file.
pub const CONFIG_ENV: &str = "STORMSLIDE_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "stormslide.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$STORMSLIDE_CONFIG`
/// 2. `./stormslide.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Level II object-store source
    #[serde(default)]
    pub level2: Level2Config,

    /// Level III vendor source
    #[serde(default)]
    pub level3: Level3Config,

    /// Couplet scanner thresholds
    #[serde(default)]
    pub scan: ScanConfig,

    /// Cache TTLs and rate-limit cooperation
    #[serde(default)]
    pub cache: CacheConfig,

    /// Transport-level retry
    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        for warning in super::validation::validate_unknown_keys(&contents) {
            warn!(path = %path.display(), "{}", warning);
        }
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        for warning in super::validation::suspicious_values(&config) {
            warn!(field = %warning.field, "{}", warning);
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Validate every section, collecting all problems.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        let s = &self.scan;
        for (name, value) in [
            ("scan.storm_motion_ms", s.storm_motion_ms),
            ("scan.shear_threshold_ms", s.shear_threshold_ms),
            ("scan.reflectivity_threshold_dbz", s.reflectivity_threshold_dbz),
            ("scan.tvs_shear_threshold_ms", s.tvs_shear_threshold_ms),
        ] {
            if !value.is_finite() {
                errors.push(format!("{name} must be a finite number (got {value})"));
            }
        }
        if s.shear_threshold_ms < 0.0 {
            errors.push(format!(
                "scan.shear_threshold_ms must be >= 0 (got {:.1})",
                s.shear_threshold_ms
            ));
        }
        if s.tvs_shear_threshold_ms < s.shear_threshold_ms {
            errors.push(format!(
                "scan.tvs_shear_threshold_ms ({:.1}) must be >= shear_threshold_ms ({:.1})",
                s.tvs_shear_threshold_ms, s.shear_threshold_ms
            ));
        }
        if s.max_sweeps == 0 {
            errors.push("scan.max_sweeps must be > 0".to_string());
        }

        let c = &self.cache;
        if c.ttl_secs == 0 {
            errors.push("cache.ttl_secs must be > 0".to_string());
        }
        if c.call_timeout_secs == 0 {
            errors.push("cache.call_timeout_secs must be > 0".to_string());
        }
        if c.fetch_deadline_secs < c.call_timeout_secs {
            errors.push(format!(
                "cache.fetch_deadline_secs ({}) must be >= call_timeout_secs ({})",
                c.fetch_deadline_secs, c.call_timeout_secs
            ));
        }
        if c.failure_ttl_secs > c.ttl_secs {
            errors.push(format!(
                "cache.failure_ttl_secs ({}) must not exceed ttl_secs ({})",
                c.failure_ttl_secs, c.ttl_secs
            ));
        }
        for (name, value) in [
            ("cache.ttl_secs", c.ttl_secs),
            ("cache.failure_ttl_secs", c.failure_ttl_secs),
            ("cache.fetch_deadline_secs", c.fetch_deadline_secs),
            ("server.prefetch_interval_secs", self.server.prefetch_interval_secs),
        ] {
            if value > defaults::MAX_CACHE_TTL_SECS {
                errors.push(format!(
                    "{name} must be <= {} (got {value})",
                    defaults::MAX_CACHE_TTL_SECS
                ));
            }
        }

        let r = &self.retry;
        if r.max_attempts == 0 {
            errors.push("retry.max_attempts must be > 0".to_string());
        }
        if !r.backoff_factor_secs.is_finite() || r.backoff_factor_secs < 0.0 {
            errors.push(format!(
                "retry.backoff_factor_secs must be a finite number >= 0 (got {})",
                r.backoff_factor_secs
            ));
        }

        let l2 = &self.level2;
        if l2.site.trim().is_empty() {
            errors.push("level2.site must not be empty".to_string());
        }
        if l2.lookback_days == 0 && l2.fixed_date.is_none() {
            errors.push("level2.lookback_days must be > 0 unless fixed_date is set".to_string());
        }
        if let Some(date) = &l2.fixed_date {
            if chrono::NaiveDate::parse_from_str(date, "%Y/%m/%d").is_err() {
                errors.push(format!("level2.fixed_date must be YYYY/MM/DD (got {date:?})"));
            }
        }

        let l3 = &self.level3;
        if l3.location.trim().is_empty() {
            errors.push("level3.location must not be empty".to_string());
        }
        if l3.limit == 0 {
            errors.push("level3.limit must be > 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {}", e),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Server Config
// ============================================================================

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address. Overridden by `STORMSLIDE_SERVER_ADDR` or `--addr`.
    pub addr: String,

    /// Background cache warm-up interval; 0 disables the warmer.
    pub prefetch_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: defaults::SERVER_ADDR.to_string(),
            prefetch_interval_secs: 0,
        }
    }
}

// ============================================================================
// Level II Source
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Level2Config {
    /// Object-store bucket endpoint
    pub endpoint: String,
    /// Radar site identifier (e.g. KTLX)
    pub site: String,
    /// Days walked back from today when today's prefix is empty
    pub lookback_days: u32,
    /// Pin the listing to one `YYYY/MM/DD` day (event replay)
    pub fixed_date: Option<String>,
    /// Where downloaded moment files are materialised
    pub data_dir: PathBuf,
}

impl Default for Level2Config {
    fn default() -> Self {
        Self {
            endpoint: defaults::LEVEL2_ENDPOINT.to_string(),
            site: defaults::LEVEL2_SITE.to_string(),
            lookback_days: defaults::LEVEL2_LOOKBACK_DAYS,
            fixed_date: None,
            data_dir: PathBuf::from(defaults::DATA_DIR),
        }
    }
}

// ============================================================================
// Level III Source
// ============================================================================

/// Vendor API settings. Credentials come from the environment only
/// (`AERIS_CLIENT_ID` / `AERIS_CLIENT_SECRET`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Level3Config {
    pub endpoint: String,
    pub location: String,
    pub query: String,
    pub limit: u32,
}

impl Default for Level3Config {
    fn default() -> Self {
        Self {
            endpoint: defaults::LEVEL3_ENDPOINT.to_string(),
            location: defaults::LEVEL3_LOCATION.to_string(),
            query: defaults::LEVEL3_QUERY.to_string(),
            limit: defaults::LEVEL3_LIMIT,
        }
    }
}

// ============================================================================
// Scanner Thresholds
// ============================================================================

/// Couplet detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Storm motion subtracted from radial velocity (m/s)
    pub storm_motion_ms: f64,
    /// Gate-to-gate shear needed for a couplet (m/s)
    pub shear_threshold_ms: f64,
    /// Reflectivity needed at the near gate (dBZ)
    pub reflectivity_threshold_dbz: f64,
    /// Shear above which a couplet is a TVS (m/s)
    pub tvs_shear_threshold_ms: f64,
    /// Sweeps scanned, lowest first
    pub max_sweeps: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            storm_motion_ms: defaults::STORM_MOTION_MS,
            shear_threshold_ms: defaults::SHEAR_THRESHOLD_MS,
            reflectivity_threshold_dbz: defaults::REFLECTIVITY_THRESHOLD_DBZ,
            tvs_shear_threshold_ms: defaults::TVS_SHEAR_THRESHOLD_MS,
            max_sweeps: defaults::MAX_SWEEPS,
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub failure_ttl_secs: u64,
    /// Per HTTP request
    pub call_timeout_secs: u64,
    /// Per complete fetch, as seen by the cache
    pub fetch_deadline_secs: u64,
    /// Cool down when `remaining-minute` is at or below this
    pub rate_limit_floor: i64,
    pub cooldown_secs: u64,
    pub rate_limit_retries: u32,
    pub rate_limit_backoff_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::CACHE_TTL_SECS,
            failure_ttl_secs: defaults::CACHE_FAILURE_TTL_SECS,
            call_timeout_secs: defaults::UPSTREAM_CALL_TIMEOUT_SECS,
            fetch_deadline_secs: defaults::FETCH_DEADLINE_SECS,
            rate_limit_floor: defaults::RATE_LIMIT_FLOOR,
            cooldown_secs: defaults::RATE_LIMIT_COOLDOWN_SECS,
            rate_limit_retries: defaults::RATE_LIMIT_RETRIES,
            rate_limit_backoff_secs: defaults::RATE_LIMIT_BACKOFF_SECS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn failure_ttl(&self) -> Duration {
        Duration::from_secs(self.failure_ttl_secs)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.fetch_deadline_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn rate_limit_backoff(&self) -> Duration {
        Duration::from_secs(self.rate_limit_backoff_secs)
    }
}

// ============================================================================
// Transport Retry
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_factor_secs: f64,
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::RETRY_MAX_ATTEMPTS,
            backoff_factor_secs: defaults::RETRY_BACKOFF_FACTOR_SECS,
            retry_statuses: defaults::RETRY_STATUSES.to_vec(),
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// What a missing Level II volume does to the whole request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level2FailurePolicy {
    /// Continue with Level III signatures only
    #[default]
    Degrade,
    /// Fail the request when the Level II fetch fails
    Fail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub level2_failure: Level2FailurePolicy,
}

// ============================================================================
// Tests
// ============================================================================
