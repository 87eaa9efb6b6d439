//! Level III payload normalizer
//!
//! The vendor sends no type tag, so the payload shape is recognised by
//! structure. Rules are tried in a fixed order and the first match maps
//! the payload; nothing matching means no signatures.
//!
//! | Order | Shape               | Recognised by                          |
//! |-------|---------------------|----------------------------------------|
//! | 1     | storm-cell list     | top-level array                        |
//! | 2     | GeoJSON collection  | object with `type = "FeatureCollection"` |
//! | 3     | legacy wrapper      | object with a `response` member        |
//! | 4     | single observation  | object with an `ob` member             |
//!
//! Elements without usable coordinates are skipped rather than failing the
//! whole payload.

use crate::config::defaults::OBSERVATION_MESO_WIND_MPH;
use crate::types::{ObservedAt, Signature, SignatureKind, SignatureSource};
use serde_json::Value;
use tracing::debug;

struct ShapeRule {
    name: &'static str,
    matches: fn(&Value) -> bool,
    map: fn(&Value) -> Vec<Signature>,
}

const SHAPES: &[ShapeRule] = &[
    ShapeRule {
        name: "storm-cell list",
        matches: Value::is_array,
        map: storm_cells,
    },
    ShapeRule {
        name: "feature collection",
        matches: is_feature_collection,
        map: feature_collection,
    },
    ShapeRule {
        name: "legacy response wrapper",
        matches: |v| v.get("response").is_some(),
        map: legacy_response,
    },
    ShapeRule {
        name: "single observation",
        matches: |v| v.get("ob").is_some(),
        map: observation,
    },
];

/// First rule whose shape `raw` matches, in priority order.
fn detect_shape(raw: &Value) -> Option<&'static ShapeRule> {
    SHAPES.iter().find(|r| (r.matches)(raw))
}

/// Map a raw Level III payload to signatures tagged `Level III`.
pub fn normalize(raw: &Value) -> Vec<Signature> {
    match detect_shape(raw) {
        Some(rule) => {
            let signatures = (rule.map)(raw);
            debug!(shape = rule.name, signatures = signatures.len(), "Normalized Level III payload");
            signatures
        }
        None => {
            debug!(shape = "unrecognised", "Level III payload shape not recognised, no signatures");
            Vec::new()
        }
    }
}

fn is_feature_collection(v: &Value) -> bool {
    v.get("type").and_then(Value::as_str) == Some("FeatureCollection")
}

// ============================================================================
// Shape mappers
// ============================================================================

/// `[{ob: {mda, tvs, dateTimeISO}, loc: {lat, long}}, ...]`
fn storm_cells(raw: &Value) -> Vec<Signature> {
    let Some(cells) = raw.as_array() else {
        return Vec::new();
    };
    cells
        .iter()
        .filter_map(|cell| {
            let (lat, lon) = loc_lat_long(cell.get("loc")?)?;
            let ob = cell.get("ob");
            let mda = ob.and_then(|o| number(o.get("mda")?)).unwrap_or(0.0);
            let tvs = ob.and_then(|o| o.get("tvs")).is_some_and(is_flag_set);

            let kind = if tvs {
                SignatureKind::Tvs
            } else if mda > 0.0 {
                SignatureKind::Meso
            } else {
                SignatureKind::None
            };
            let observed_at = ob
                .and_then(|o| o.get("dateTimeISO"))
                .map_or(ObservedAt::Unknown, timestamp);

            Some(level3(lat, lon, mda, kind, observed_at))
        })
        .collect()
}

/// `{type: "FeatureCollection", features: [{geometry: {coordinates: [lon, lat]}, properties: {...}}]}`
fn feature_collection(raw: &Value) -> Vec<Signature> {
    let Some(features) = raw.get("features").and_then(Value::as_array) else {
        return Vec::new();
    };
    features
        .iter()
        .filter_map(|feature| {
            let coords = feature.pointer("/geometry/coordinates")?.as_array()?;
            let lon = number(coords.first()?)?;
            let lat = number(coords.get(1)?)?;
            let props = feature.get("properties");

            let shear = props
                .and_then(|p| number(p.get("shear")?))
                .unwrap_or(0.0);
            // Features without a type are TVS reports.
            let kind = props
                .and_then(|p| p.get("type")?.as_str())
                .map_or(SignatureKind::Tvs, SignatureKind::from_label);
            let observed_at = props
                .and_then(|p| p.get("timestamp"))
                .map_or(ObservedAt::Unknown, timestamp);

            Some(level3(lat, lon, shear, kind, observed_at))
        })
        .collect()
}

/// `{response: [{loc: {lat, long}, shear, type, timestamp}, ...]}`
fn legacy_response(raw: &Value) -> Vec<Signature> {
    let Some(entries) = raw.get("response").and_then(Value::as_array) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let (lat, lon) = loc_lat_long(entry.get("loc")?)?;
            let shear = entry.get("shear").and_then(number).unwrap_or(0.0);
            let kind = entry
                .get("type")
                .and_then(Value::as_str)
                .map_or(SignatureKind::None, SignatureKind::from_label);
            let observed_at = entry
                .get("timestamp")
                .map_or(ObservedAt::Unknown, timestamp);

            Some(level3(lat, lon, shear, kind, observed_at))
        })
        .collect()
}

/// `{ob: {windSpeedMPH, timestamp}, loc: {lat, long}}`
fn observation(raw: &Value) -> Vec<Signature> {
    let Some((lat, lon)) = raw.get("loc").and_then(loc_lat_long) else {
        return Vec::new();
    };
    let ob = raw.get("ob");
    let wind_mph = ob
        .and_then(|o| number(o.get("windSpeedMPH")?))
        .unwrap_or(0.0);
    let kind = if wind_mph > OBSERVATION_MESO_WIND_MPH {
        SignatureKind::Meso
    } else {
        SignatureKind::None
    };
    let observed_at = ob
        .and_then(|o| o.get("timestamp").or_else(|| o.get("dateTimeISO")))
        .map_or(ObservedAt::Unknown, timestamp);

    vec![level3(lat, lon, wind_mph, kind, observed_at)]
}

// ============================================================================
// Field helpers
// ============================================================================

fn level3(lat: f64, lon: f64, shear: f64, kind: SignatureKind, at: ObservedAt) -> Signature {
    Signature::new(lat, lon, shear, kind, SignatureSource::LevelIII, at)
}

/// Finite number, accepting numeric strings.
fn number(v: &Value) -> Option<f64> {
    let n = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

fn loc_lat_long(loc: &Value) -> Option<(f64, f64)> {
    Some((number(loc.get("lat")?)?, number(loc.get("long")?)?))
}

fn is_flag_set(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        other => number(other) == Some(1.0),
    }
}

/// RFC 3339 string or epoch seconds.
fn timestamp(v: &Value) -> ObservedAt {
    match v {
        Value::String(s) => ObservedAt::parse_rfc3339(s),
        Value::Number(n) => n.as_i64().map_or(ObservedAt::Unknown, ObservedAt::from_epoch_secs),
        _ => ObservedAt::Unknown,
    }
}
