//! Non-fatal config checks: unknown keys and suspicious values.
//!
//! The raw TOML is walked as a `toml::Value` tree before serde sees it, so
//! a misspelt key (which serde would silently ignore under
//! `#[serde(default)]`) produces a warning with a "did you mean?" hint.
//! Warnings never reject a config; hard errors live in
//! [`AppConfig::validate`](super::AppConfig::validate).

use std::collections::BTreeSet;

use super::AppConfig;

/// Optional keys that are absent from the serialised defaults.
const OPTIONAL_KEYS: &[&str] = &["level2.fixed_date"];

/// Largest edit distance still offered as a suggestion.
const MAX_SUGGESTION_DISTANCE: usize = 3;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

/// Every valid dotted key path, taken from the serialised defaults so the
/// list follows the config structs.
pub fn known_config_keys() -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = toml::Value::try_from(AppConfig::default())
        .map(|value| walk_toml_keys(&value, "").into_iter().collect())
        .unwrap_or_default();
    keys.extend(OPTIONAL_KEYS.iter().map(|k| k.to_string()));
    keys
}

/// All dotted key paths in a TOML tree: `{a = {b = 1}}` yields `["a", "a.b"]`.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_chars.len()]
}

/// Closest known key within a small edit distance.
pub fn suggest_correction(unknown: &str, known: &BTreeSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(_, dist)| *dist)
        .map(|(k, _)| k.clone())
}

/// Warnings for keys in `raw_toml` that no config struct reads.
///
/// Unparseable input yields no warnings; serde reports the parse error.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let Ok(value) = raw_toml.parse::<toml::Value>() else {
        return Vec::new();
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

/// Values that are legal but probably not what the operator meant.
pub fn suspicious_values(config: &AppConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let mut warn = |field: &str, message: String| {
        warnings.push(ValidationWarning {
            field: field.to_string(),
            message,
            suggestion: None,
        });
    };

    let s = &config.scan;
    if s.reflectivity_threshold_dbz > 75.0 {
        warn(
            "scan.reflectivity_threshold_dbz",
            format!(
                "scan.reflectivity_threshold_dbz = {:.1} is above any realistic echo; no couplet will pass",
                s.reflectivity_threshold_dbz
            ),
        );
    }
    if s.tvs_shear_threshold_ms > 150.0 {
        warn(
            "scan.tvs_shear_threshold_ms",
            format!(
                "scan.tvs_shear_threshold_ms = {:.1} m/s exceeds Doppler velocity range; TVS will never be flagged",
                s.tvs_shear_threshold_ms
            ),
        );
    }

    let c = &config.cache;
    if c.failure_ttl_secs == 0 {
        warn(
            "cache.failure_ttl_secs",
            "cache.failure_ttl_secs = 0: failures are not cached and every request retries the upstream".to_string(),
        );
    }
    if c.cooldown_secs >= c.ttl_secs {
        warn(
            "cache.cooldown_secs",
            format!(
                "cache.cooldown_secs ({}) is not shorter than ttl_secs ({})",
                c.cooldown_secs, c.ttl_secs
            ),
        );
    }

    warnings
}
