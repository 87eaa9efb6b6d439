//! Signature types shared by both radar sources

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Classification of a candidate tornadic signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignatureKind {
    /// Tornadic vortex signature
    #[serde(rename = "TVS")]
    Tvs,
    /// Mesocyclone
    #[serde(rename = "MESO")]
    Meso,
    /// Reported by the vendor but below either threshold
    #[serde(rename = "NONE")]
    None,
}

impl SignatureKind {
    /// Parse a vendor `type` string. Unknown labels classify as `None`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_uppercase().as_str() {
            "TVS" => SignatureKind::Tvs,
            "MESO" | "MDA" => SignatureKind::Meso,
            _ => SignatureKind::None,
        }
    }
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureKind::Tvs => write!(f, "TVS"),
            SignatureKind::Meso => write!(f, "MESO"),
            SignatureKind::None => write!(f, "NONE"),
        }
    }
}

/// Which upstream feed produced a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SignatureSource {
    #[serde(rename = "Level II")]
    LevelII,
    #[serde(rename = "Level III")]
    LevelIII,
}

impl fmt::Display for SignatureSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureSource::LevelII => write!(f, "Level II"),
            SignatureSource::LevelIII => write!(f, "Level III"),
        }
    }
}

/// Observation time of a signature, or `unknown` when the feed omits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObservedAt {
    At(DateTime<FixedOffset>),
    #[default]
    Unknown,
}

impl ObservedAt {
    /// Parse an RFC 3339 timestamp; anything else is `Unknown`.
    pub fn parse_rfc3339(raw: &str) -> Self {
        DateTime::parse_from_rfc3339(raw.trim())
            .map(ObservedAt::At)
            .unwrap_or(ObservedAt::Unknown)
    }

    /// Unix epoch seconds, as the vendor's `timestamp` fields carry.
    pub fn from_epoch_secs(secs: i64) -> Self {
        match Utc.timestamp_opt(secs, 0).single() {
            Some(ts) => ObservedAt::At(ts.fixed_offset()),
            None => ObservedAt::Unknown,
        }
    }

    pub fn from_utc(ts: DateTime<Utc>) -> Self {
        ObservedAt::At(ts.fixed_offset())
    }

    pub fn is_known(&self) -> bool {
        matches!(self, ObservedAt::At(_))
    }
}

impl Serialize for ObservedAt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ObservedAt::At(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            ObservedAt::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

/// A candidate tornadic signature with provenance.
///
/// `kind` is fixed when the signature is built by the scanner or the
/// normalizer; fields are read-only after construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signature {
    lat: f64,
    lon: f64,
    shear: f64,
    #[serde(rename = "type")]
    kind: SignatureKind,
    source: SignatureSource,
    #[serde(rename = "time")]
    observed_at: ObservedAt,
}

impl Signature {
    pub fn new(
        lat: f64,
        lon: f64,
        shear: f64,
        kind: SignatureKind,
        source: SignatureSource,
        observed_at: ObservedAt,
    ) -> Self {
        Self {
            lat,
            lon,
            shear,
            kind,
            source,
            observed_at,
        }
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn shear(&self) -> f64 {
        self.shear
    }

    pub fn kind(&self) -> SignatureKind {
        self.kind
    }

    pub fn source(&self) -> SignatureSource {
        self.source
    }

    pub fn observed_at(&self) -> ObservedAt {
        self.observed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_label() {
        assert_eq!(SignatureKind::from_label("TVS"), SignatureKind::Tvs);
        assert_eq!(SignatureKind::from_label("meso"), SignatureKind::Meso);
        assert_eq!(SignatureKind::from_label(" MESO "), SignatureKind::Meso);
        assert_eq!(SignatureKind::from_label("hail"), SignatureKind::None);
        assert_eq!(SignatureKind::from_label(""), SignatureKind::None);
    }

    #[test]
    fn test_signature_json_shape() {
        let sig = Signature::new(
            30.1,
            -84.2,
            5.0,
            SignatureKind::Tvs,
            SignatureSource::LevelIII,
            ObservedAt::Unknown,
        );
        let v = serde_json::to_value(&sig).unwrap();
        assert_eq!(v["lat"], 30.1);
        assert_eq!(v["lon"], -84.2);
        assert_eq!(v["type"], "TVS");
        assert_eq!(v["source"], "Level III");
        assert_eq!(v["time"], "unknown");
    }

    #[test]
    fn test_observed_at_parsing() {
        let at = ObservedAt::parse_rfc3339("2024-05-01T13:45:00-05:00");
        assert!(at.is_known());
        assert!(!ObservedAt::parse_rfc3339("yesterday").is_known());

        let epoch = ObservedAt::from_epoch_secs(1_588_500_000);
        let v = serde_json::to_value(epoch).unwrap();
        assert_eq!(v, "2020-05-03T10:00:00+00:00");
    }
}
