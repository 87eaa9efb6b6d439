//! System-wide default constants.
//!
//! Reference values for every tunable in `AppConfig`, grouped by subsystem.

// ============================================================================
// Couplet Scanner
// ============================================================================

/// Assumed storm motion subtracted from radial velocity (m/s).
pub const STORM_MOTION_MS: f64 = 10.0;

/// Minimum gate-to-gate shear for a couplet (m/s).
pub const SHEAR_THRESHOLD_MS: f64 = 40.0;

/// Minimum reflectivity at the near gate (dBZ). Debris-ball proxy.
pub const REFLECTIVITY_THRESHOLD_DBZ: f64 = 50.0;

/// Shear above which a couplet is classified TVS instead of MESO (m/s).
pub const TVS_SHEAR_THRESHOLD_MS: f64 = 60.0;

/// Sweeps scanned per volume, lowest first.
pub const MAX_SWEEPS: usize = 5;

// ============================================================================
// Level III Normalizer
// ============================================================================

/// Observation wind speed above which a single observation counts as MESO (mph).
pub const OBSERVATION_MESO_WIND_MPH: f64 = 30.0;

// ============================================================================
// Rate-Limited Cache
// ============================================================================

/// Lifetime of a successful cache entry (seconds).
pub const CACHE_TTL_SECS: u64 = 600;

/// Lifetime of a cached failure outcome (seconds).
pub const CACHE_FAILURE_TTL_SECS: u64 = 60;

/// Upper bound on every cache lifetime and refresh interval (seconds).
pub const MAX_CACHE_TTL_SECS: u64 = 86_400;

/// Per-call timeout for every upstream request (seconds).
pub const UPSTREAM_CALL_TIMEOUT_SECS: u64 = 10;

/// Upper bound on one complete source fetch, transport retries and
/// downloads included (seconds).
pub const FETCH_DEADLINE_SECS: u64 = 120;

/// `remaining-minute` at or below which the fill path cools down.
pub const RATE_LIMIT_FLOOR: i64 = 5;

/// Cooldown applied when the vendor is close to its per-minute limit (seconds).
pub const RATE_LIMIT_COOLDOWN_SECS: u64 = 10;

/// Extra attempts after a "too many requests" answer.
pub const RATE_LIMIT_RETRIES: u32 = 1;

/// Fixed delay before retrying a rate-limited call (seconds).
pub const RATE_LIMIT_BACKOFF_SECS: u64 = 10;

// ============================================================================
// Transport Retry
// ============================================================================

/// Total transport attempts per upstream call.
pub const RETRY_MAX_ATTEMPTS: u32 = 3;

/// Backoff factor; delay before attempt n+1 is `factor * 2^(n-1)` seconds.
pub const RETRY_BACKOFF_FACTOR_SECS: f64 = 1.0;

/// Upper bound on a single transport backoff delay (seconds).
pub const RETRY_MAX_BACKOFF_SECS: f64 = 30.0;

/// Vendor-specific 5xx returned by the storm-cell API edge.
pub const VENDOR_ORIGIN_ERROR_STATUS: u16 = 520;

/// Statuses retried at the transport level.
pub const RETRY_STATUSES: [u16; 6] = [429, 500, 502, 503, 504, VENDOR_ORIGIN_ERROR_STATUS];

// ============================================================================
// Upstreams
// ============================================================================

/// Public NEXRAD Level II archive bucket endpoint.
pub const LEVEL2_ENDPOINT: &str = "https://noaa-nexrad-level2.s3.amazonaws.com";

/// Default WSR-88D site for Level II volumes.
pub const LEVEL2_SITE: &str = "KTLX";

/// Days walked back from today looking for a volume.
pub const LEVEL2_LOOKBACK_DAYS: u32 = 1;

/// Local directory for downloaded moment files.
pub const DATA_DIR: &str = "./data";

/// Storm-cell vendor API endpoint.
pub const LEVEL3_ENDPOINT: &str = "https://api.aerisapi.com";

/// Default site/location for storm-cell queries.
pub const LEVEL3_LOCATION: &str = "KTLH";

/// Storm-cell filter: cells with a TVS or MDA detection.
pub const LEVEL3_QUERY: &str = "tvs:1,mda:1";

/// Maximum storm cells per request.
pub const LEVEL3_LIMIT: u32 = 10;

/// Environment variable holding the vendor client id.
pub const LEVEL3_CLIENT_ID_ENV: &str = "AERIS_CLIENT_ID";

/// Environment variable holding the vendor client secret.
pub const LEVEL3_CLIENT_SECRET_ENV: &str = "AERIS_CLIENT_SECRET";

// ============================================================================
// Server
// ============================================================================

/// HTTP bind address.
pub const SERVER_ADDR: &str = "0.0.0.0:5000";
