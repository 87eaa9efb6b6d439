//! Velocity-couplet scanner for Level II moment grids
//!
//! Walks adjacent gate pairs along each radial of the lowest sweeps and flags
//! pairs whose storm-relative velocity difference (gate-to-gate shear) and
//! reflectivity both exceed the configured thresholds.
//!
//! ```text
//! srv[i][j]   = velocity[i][j] - storm_motion
//! shear       = |srv[i][j] - srv[i][j+1]|
//! emit when     shear > shear_threshold  AND  refl[i][j] > refl_threshold
//! kind        = TVS if shear > tvs_shear_threshold else MESO
//! ```
//!
//! The scanner is a pure function of its inputs: no shared state, and the
//! grid is only ever borrowed.

use crate::config::ScanConfig;
use crate::types::{GridShapeError, MomentGrid, ObservedAt, Signature, SignatureKind, SignatureSource};
use tracing::debug;

/// Reflectivity used for masked or non-numeric cells. Always fails the
/// reflectivity test for any sane threshold.
pub const INVALID_REFLECTIVITY_DBZ: f64 = -999.0;

/// Detect shear couplets in `grid`.
///
/// Absent or empty velocity/reflectivity yields an empty list. A grid whose
/// fields disagree in shape yields `GridShapeError`.
pub fn scan(grid: &MomentGrid, params: &ScanConfig) -> Result<Vec<Signature>, GridShapeError> {
    if grid.lacks_moments() {
        debug!("Moment grid has no velocity/reflectivity data, nothing to scan");
        return Ok(Vec::new());
    }
    grid.validate(params.max_sweeps)?;

    let (Some(velocity), Some(reflectivity), Some(latitude), Some(longitude)) = (
        grid.velocity.as_ref(),
        grid.reflectivity.as_ref(),
        grid.latitude.as_ref(),
        grid.longitude.as_ref(),
    ) else {
        return Ok(Vec::new());
    };

    let observed_at = grid
        .scan_time
        .map_or(ObservedAt::Unknown, ObservedAt::from_utc);
    let sweeps = grid.num_sweeps().min(params.max_sweeps);
    let mut couplets = Vec::new();

    for i in 0..sweeps {
        let radial = &velocity[i];
        for (j, pair) in radial.windows(2).enumerate() {
            let Some(shear) = gate_pair_shear(pair[0], pair[1], params.storm_motion_ms) else {
                continue;
            };
            let refl = reflectivity_or_sentinel(reflectivity[i][j]);

            if shear > params.shear_threshold_ms && refl > params.reflectivity_threshold_dbz {
                couplets.push(Signature::new(
                    latitude[i][j],
                    longitude[i][j],
                    shear,
                    classify(shear, params),
                    SignatureSource::LevelII,
                    observed_at,
                ));
            }
        }
    }

    debug!(
        sweeps_scanned = sweeps,
        couplets = couplets.len(),
        "Level II couplet scan complete"
    );
    Ok(couplets)
}

/// Gate-to-gate shear between two adjacent gates, `None` if either gate is
/// masked or non-finite.
fn gate_pair_shear(near: Option<f64>, far: Option<f64>, storm_motion: f64) -> Option<f64> {
    let near = near.filter(|v| v.is_finite())? - storm_motion;
    let far = far.filter(|v| v.is_finite())? - storm_motion;
    Some((near - far).abs())
}

fn reflectivity_or_sentinel(cell: Option<f64>) -> f64 {
    cell.filter(|v| v.is_finite())
        .unwrap_or(INVALID_REFLECTIVITY_DBZ)
}

fn classify(shear: f64, params: &ScanConfig) -> SignatureKind {
    if shear > params.tvs_shear_threshold_ms {
        SignatureKind::Tvs
    } else {
        SignatureKind::Meso
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    /// Single-sweep grid with one velocity pair and the given reflectivity
    /// at the near gate.
    fn pair_grid(v0: f64, v1: f64, refl: Option<f64>) -> MomentGrid {
        MomentGrid {
            velocity: Some(vec![vec![Some(v0), Some(v1)]]),
            reflectivity: Some(vec![vec![refl, Some(0.0)]]),
            latitude: Some(vec![vec![35.33, 35.34]]),
            longitude: Some(vec![vec![-97.27, -97.28]]),
            scan_time: None,
        }
    }

    fn kinds(grid: &MomentGrid) -> Vec<SignatureKind> {
        scan(grid, &ScanConfig::default())
            .unwrap()
            .iter()
            .map(Signature::kind)
            .collect()
    }

    #[test]
    fn test_no_velocity_field_is_empty() {
        let grid = MomentGrid {
            velocity: None,
            ..pair_grid(0.0, 0.0, Some(60.0))
        };
        assert!(scan(&grid, &ScanConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn test_empty_reflectivity_is_empty() {
        let grid = MomentGrid {
            reflectivity: Some(Vec::new()),
            ..pair_grid(-40.0, 40.0, Some(60.0))
        };
        assert!(scan(&grid, &ScanConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn test_strong_shear_is_tvs() {
        let grid = pair_grid(-35.0, 30.0, Some(55.0));
        let found = scan(&grid, &ScanConfig::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].kind(), SignatureKind::Tvs);
        assert_eq!(found[0].source(), SignatureSource::LevelII);
        assert!((found[0].shear() - 65.0).abs() < 1e-9);
        assert_eq!(found[0].lat(), 35.33);
        assert_eq!(found[0].lon(), -97.27);
    }

    #[test]
    fn test_moderate_shear_is_meso() {
        assert_eq!(kinds(&pair_grid(-20.0, 25.0, Some(51.0))), vec![SignatureKind::Meso]);
        // 60 exactly is not above the TVS threshold
        assert_eq!(kinds(&pair_grid(-30.0, 30.0, Some(51.0))), vec![SignatureKind::Meso]);
    }

    #[test]
    fn test_thresholds_are_strict() {
        // shear == 40 does not pass
        assert!(kinds(&pair_grid(-20.0, 20.0, Some(60.0))).is_empty());
        // reflectivity == 50 does not pass
        assert!(kinds(&pair_grid(-40.0, 40.0, Some(50.0))).is_empty());
    }

    #[test]
    fn test_masked_reflectivity_never_emits() {
        assert!(kinds(&pair_grid(-40.0, 40.0, None)).is_empty());
        assert!(kinds(&pair_grid(-40.0, 40.0, Some(f64::NAN))).is_empty());
    }

    #[test]
    fn test_masked_velocity_skips_pair() {
        let mut grid = pair_grid(-40.0, 40.0, Some(60.0));
        if let Some(v) = grid.velocity.as_mut() {
            v[0][1] = None;
        }
        assert!(kinds(&grid).is_empty());
    }

    #[test]
    fn test_storm_motion_does_not_change_pair_shear() {
        let grid = pair_grid(-35.0, 30.0, Some(55.0));
        let params = ScanConfig {
            storm_motion_ms: 25.0,
            ..ScanConfig::default()
        };
        let found = scan(&grid, &params).unwrap();
        assert!((found[0].shear() - 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_max_sweeps_limits_scan() {
        let row = vec![Some(-40.0), Some(40.0)];
        let grid = MomentGrid {
            velocity: Some(vec![row.clone(); 8]),
            reflectivity: Some(vec![vec![Some(60.0), Some(60.0)]; 8]),
            latitude: Some(vec![vec![35.0, 35.0]; 8]),
            longitude: Some(vec![vec![-97.0, -97.0]; 8]),
            scan_time: None,
        };
        assert_eq!(scan(&grid, &ScanConfig::default()).unwrap().len(), 5);

        let params = ScanConfig {
            max_sweeps: 2,
            ..ScanConfig::default()
        };
        assert_eq!(scan(&grid, &params).unwrap().len(), 2);
    }

    #[test]
    fn test_last_gate_only_used_as_far_side() {
        // Three gates -> two pairs; only the near gate's reflectivity matters.
        let grid = MomentGrid {
            velocity: Some(vec![vec![Some(0.0), Some(0.0), Some(70.0)]]),
            reflectivity: Some(vec![vec![Some(0.0), Some(60.0), Some(0.0)]]),
            latitude: Some(vec![vec![1.0, 2.0, 3.0]]),
            longitude: Some(vec![vec![-1.0, -2.0, -3.0]]),
            scan_time: None,
        };
        let found = scan(&grid, &ScanConfig::default()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].lat(), 2.0);
        assert_eq!(found[0].kind(), SignatureKind::Tvs);
    }

    #[test]
    fn test_mismatched_grid_is_error() {
        let mut grid = pair_grid(-40.0, 40.0, Some(60.0));
        grid.latitude = Some(vec![vec![35.0]]);
        assert!(matches!(
            scan(&grid, &ScanConfig::default()),
            Err(GridShapeError::GateMismatch { field: "latitude", .. })
        ));
    }

    #[test]
    fn test_scan_time_propagates() {
        let mut grid = pair_grid(-40.0, 40.0, Some(60.0));
        let ts = Utc.with_ymd_and_hms(2020, 5, 3, 22, 15, 0).unwrap();
        grid.scan_time = Some(ts);
        let found = scan(&grid, &ScanConfig::default()).unwrap();
        assert_eq!(found[0].observed_at(), ObservedAt::from_utc(ts));
    }

    #[test]
    fn test_grid_is_not_mutated() {
        let grid = pair_grid(-40.0, 40.0, Some(60.0));
        let before = format!("{:?}", grid);
        let _ = scan(&grid, &ScanConfig::default());
        assert_eq!(before, format!("{:?}", grid));
    }
}
