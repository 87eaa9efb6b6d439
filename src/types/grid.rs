//! Polar moment grid (Level II volume, one row per sweep/radial)

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

/// One moment field: rows indexed by sweep, columns by gate.
/// `None` marks a masked or invalid cell.
pub type MomentField = Vec<Vec<Option<f64>>>;

/// Gate geolocation: rows indexed by sweep, columns by gate.
pub type GateCoordinates = Vec<Vec<f64>>;

/// Scanner input could not be interpreted as a rectangular polar grid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GridShapeError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("{field} has {actual} sweeps, velocity has {expected}")]
    SweepMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} sweep {sweep} has {actual} gates, velocity has {expected}")]
    GateMismatch {
        field: &'static str,
        sweep: usize,
        expected: usize,
        actual: usize,
    },

    #[error("grid decode failed: {0}")]
    Decode(String),
}

/// In-memory Level II moment grid.
///
/// Velocity is storm-relative-ready radial velocity (m/s), reflectivity is
/// dBZ. Latitude/longitude give each gate's position. The grid is never
/// mutated after decoding.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MomentGrid {
    #[serde(default)]
    pub velocity: Option<MomentField>,
    #[serde(default)]
    pub reflectivity: Option<MomentField>,
    #[serde(default)]
    pub latitude: Option<GateCoordinates>,
    #[serde(default)]
    pub longitude: Option<GateCoordinates>,
    /// Volume scan time, when the producer recorded it
    #[serde(default)]
    pub scan_time: Option<DateTime<Utc>>,
}

impl MomentGrid {
    /// Number of sweeps in the velocity field (0 when absent).
    pub fn num_sweeps(&self) -> usize {
        self.velocity.as_ref().map_or(0, Vec::len)
    }

    /// True when either moment needed for couplet detection is absent or empty.
    pub fn lacks_moments(&self) -> bool {
        let empty = |field: &Option<MomentField>| {
            field
                .as_ref()
                .map_or(true, |rows| rows.iter().all(Vec::is_empty))
        };
        empty(&self.velocity) || empty(&self.reflectivity)
    }

    /// Check that reflectivity and gate coordinates line up with velocity
    /// over the sweeps that will be scanned.
    pub fn validate(&self, max_sweeps: usize) -> Result<(), GridShapeError> {
        let velocity = self
            .velocity
            .as_ref()
            .ok_or(GridShapeError::MissingField("velocity"))?;
        let reflectivity = self
            .reflectivity
            .as_ref()
            .ok_or(GridShapeError::MissingField("reflectivity"))?;
        let latitude = self
            .latitude
            .as_ref()
            .ok_or(GridShapeError::MissingField("latitude"))?;
        let longitude = self
            .longitude
            .as_ref()
            .ok_or(GridShapeError::MissingField("longitude"))?;

        let sweeps = velocity.len().min(max_sweeps);
        check_sweeps("reflectivity", reflectivity.len(), sweeps)?;
        check_sweeps("latitude", latitude.len(), sweeps)?;
        check_sweeps("longitude", longitude.len(), sweeps)?;

        for (i, row) in velocity.iter().take(sweeps).enumerate() {
            let gates = row.len();
            check_gates("reflectivity", i, reflectivity[i].len(), gates)?;
            check_gates("latitude", i, latitude[i].len(), gates)?;
            check_gates("longitude", i, longitude[i].len(), gates)?;
        }
        Ok(())
    }
}

fn check_sweeps(field: &'static str, actual: usize, needed: usize) -> Result<(), GridShapeError> {
    if actual < needed {
        return Err(GridShapeError::SweepMismatch {
            field,
            expected: needed,
            actual,
        });
    }
    Ok(())
}

fn check_gates(
    field: &'static str,
    sweep: usize,
    actual: usize,
    expected: usize,
) -> Result<(), GridShapeError> {
    if actual != expected {
        return Err(GridShapeError::GateMismatch {
            field,
            sweep,
            expected,
            actual,
        });
    }
    Ok(())
}
