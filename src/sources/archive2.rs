//! NEXRAD Archive II volume → [`MomentGrid`]
//!
//! Layout of a volume file:
//!
//! ```text
//! [24] volume header   "AR2V00xx." ext(3) date(u32) ms(u32) icao(4)
//! [4]  LDM control word (i32 BE, negative on the last record)
//! [n]  bzip2 stream of messages
//! ...
//! ```
//!
//! Each decompressed message starts with a 12-byte CTM header and a 16-byte
//! message header. Type 31 (digital radar data) messages are variable length
//! and carry one radial; every other type occupies a fixed 2432-byte segment
//! and is skipped.
//!
//! Grid rows are radials in file order, columns are gates on a common range
//! axis. Gate positions use the 4/3 effective earth radius beam model.

use std::fs;
use std::io::Read;

use bzip2::read::BzDecoder;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::sources::grid_decoder::GridDecoder;
use crate::sources::MomentFile;
use crate::types::{GridShapeError, MomentField, MomentGrid};

/// Leading bytes of every Archive II volume.
pub const ARCHIVE2_MAGIC: &[u8; 4] = b"AR2V";

const VOLUME_HEADER_LEN: usize = 24;
const CTM_HEADER_LEN: usize = 12;
const MESSAGE_HEADER_LEN: usize = 16;
const SEGMENT_LEN: usize = 2432;
const DIGITAL_RADAR_DATA: u8 = 31;
/// Data block pointers in a type 31 header.
const MAX_DATA_BLOCKS: usize = 10;
const MOMENT_HEADER_LEN: usize = 28;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const EFFECTIVE_RADIUS_M: f64 = EARTH_RADIUS_M * 4.0 / 3.0;

/// Decodes Archive II volumes downloaded from the Level II object store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Archive2Decoder;

impl GridDecoder for Archive2Decoder {
    fn decode(&self, file: &MomentFile) -> Result<MomentGrid, GridShapeError> {
        let bytes = fs::read(&file.path)
            .map_err(|e| GridShapeError::Decode(format!("{}: {e}", file.path.display())))?;
        decode_volume(&bytes).map_err(|e| match e {
            GridShapeError::Decode(msg) => {
                GridShapeError::Decode(format!("{}: {msg}", file.path.display()))
            }
            other => other,
        })
    }
}

/// Decode a complete Archive II volume held in memory.
pub fn decode_volume(bytes: &[u8]) -> Result<MomentGrid, GridShapeError> {
    let scan_time = volume_time(bytes)?;
    let messages = decompress(bytes)?;
    let radials = read_radials(&messages)?;

    if radials.is_empty() {
        return Err(decode_err("no digital radar data messages"));
    }
    let site = radials
        .iter()
        .find_map(|r| r.site)
        .ok_or_else(|| decode_err("no volume block with site location"))?;

    debug!(
        radials = radials.len(),
        site_lat = site.0,
        site_lon = site.1,
        "Decoded Archive II volume"
    );
    Ok(build_grid(&radials, site, scan_time))
}

fn decode_err(msg: impl Into<String>) -> GridShapeError {
    GridShapeError::Decode(msg.into())
}

fn truncated(what: &str) -> GridShapeError {
    decode_err(format!("truncated {what}"))
}

// ============================================================================
// Big-endian field readers
// ============================================================================

fn be_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2)?.try_into().ok().map(u16::from_be_bytes)
}

fn be_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4)?.try_into().ok().map(u32::from_be_bytes)
}

fn be_i32(buf: &[u8], at: usize) -> Option<i32> {
    buf.get(at..at + 4)?.try_into().ok().map(i32::from_be_bytes)
}

fn be_f32(buf: &[u8], at: usize) -> Option<f64> {
    buf.get(at..at + 4)?
        .try_into()
        .ok()
        .map(|b| f64::from(f32::from_be_bytes(b)))
}

// ============================================================================
// Volume header and LDM records
// ============================================================================

/// Scan start from the volume header. Day 1 of the date field is 1970-01-01.
fn volume_time(bytes: &[u8]) -> Result<Option<DateTime<Utc>>, GridShapeError> {
    if bytes.len() < VOLUME_HEADER_LEN {
        return Err(truncated("volume header"));
    }
    if !bytes.starts_with(ARCHIVE2_MAGIC) {
        return Err(decode_err("not an Archive II volume"));
    }
    let days = be_u32(bytes, 12).ok_or_else(|| truncated("volume header"))?;
    let millis = be_u32(bytes, 16).ok_or_else(|| truncated("volume header"))?;
    if days == 0 {
        return Ok(None);
    }

    let epoch_ms = (i64::from(days) - 1) * 86_400_000 + i64::from(millis);
    Ok(Utc.timestamp_millis_opt(epoch_ms).single())
}

/// Concatenated message stream. Volumes without bzip2 records are taken as
/// an uncompressed message stream.
fn decompress(bytes: &[u8]) -> Result<Vec<u8>, GridShapeError> {
    let body = &bytes[VOLUME_HEADER_LEN..];
    if body.get(4..6) != Some(&b"BZ"[..]) {
        return Ok(body.to_vec());
    }

    let mut out = Vec::new();
    let mut at = 0;
    while at + 4 <= body.len() {
        let control = be_i32(body, at).ok_or_else(|| truncated("LDM control word"))?;
        let len = usize::try_from(control.unsigned_abs())
            .map_err(|_| decode_err("LDM record too large"))?;
        let record = body
            .get(at + 4..at + 4 + len)
            .ok_or_else(|| truncated("LDM record"))?;
        BzDecoder::new(record)
            .read_to_end(&mut out)
            .map_err(|e| decode_err(format!("bzip2 record at byte {}: {e}", at + VOLUME_HEADER_LEN)))?;
        at += 4 + len;
        if control < 0 {
            break;
        }
    }
    Ok(out)
}

// ============================================================================
// Type 31 radials
// ============================================================================

struct Moment {
    first_gate_m: u16,
    gate_interval_m: u16,
    values: Vec<Option<f64>>,
}

struct Radial {
    azimuth_deg: f64,
    elevation_deg: f64,
    site: Option<(f64, f64)>,
    reflectivity: Option<Moment>,
    velocity: Option<Moment>,
}

fn read_radials(stream: &[u8]) -> Result<Vec<Radial>, GridShapeError> {
    let mut radials = Vec::new();
    let mut at = 0;
    while at + CTM_HEADER_LEN + MESSAGE_HEADER_LEN <= stream.len() {
        let header = at + CTM_HEADER_LEN;
        let size = usize::from(be_u16(stream, header).ok_or_else(|| truncated("message header"))?);
        let kind = stream.get(header + 3).copied().unwrap_or_default();

        if kind == DIGITAL_RADAR_DATA {
            let end = header + size * 2;
            let body = stream
                .get(header + MESSAGE_HEADER_LEN..end)
                .ok_or_else(|| truncated("digital radar data message"))?;
            radials.push(read_radial(body)?);
            at = end;
        } else {
            at += SEGMENT_LEN;
        }
    }
    Ok(radials)
}

fn read_radial(body: &[u8]) -> Result<Radial, GridShapeError> {
    let azimuth_deg = be_f32(body, 12).ok_or_else(|| truncated("radial header"))?;
    let elevation_deg = be_f32(body, 24).ok_or_else(|| truncated("radial header"))?;
    let blocks = usize::from(be_u16(body, 30).ok_or_else(|| truncated("radial header"))?);

    let mut radial = Radial {
        azimuth_deg,
        elevation_deg,
        site: None,
        reflectivity: None,
        velocity: None,
    };
    for k in 0..blocks.min(MAX_DATA_BLOCKS) {
        let pointer = be_u32(body, 32 + 4 * k).ok_or_else(|| truncated("block pointer"))?;
        let offset = usize::try_from(pointer).map_err(|_| decode_err("block pointer overflow"))?;
        let block = body.get(offset..).ok_or_else(|| truncated("data block"))?;
        match block.get(1..4) {
            Some(b"VOL") => {
                let lat = be_f32(block, 8).ok_or_else(|| truncated("volume block"))?;
                let lon = be_f32(block, 12).ok_or_else(|| truncated("volume block"))?;
                radial.site = Some((lat, lon));
            }
            Some(b"REF") => radial.reflectivity = Some(read_moment(block)?),
            Some(b"VEL") => radial.velocity = Some(read_moment(block)?),
            _ => {}
        }
    }
    Ok(radial)
}

/// Raw 0 is below threshold and raw 1 is range folded; both are masked.
fn read_moment(block: &[u8]) -> Result<Moment, GridShapeError> {
    let header = block
        .get(..MOMENT_HEADER_LEN)
        .ok_or_else(|| truncated("moment block"))?;
    let gates = usize::from(be_u16(header, 8).unwrap_or_default());
    let first_gate_m = be_u16(header, 10).unwrap_or_default();
    let gate_interval_m = be_u16(header, 12).unwrap_or_default();
    let word_size = header[19];
    let scale = be_f32(header, 20).unwrap_or_default();
    let offset = be_f32(header, 24).unwrap_or_default();

    if gate_interval_m == 0 || scale == 0.0 {
        return Err(decode_err("moment block with zero gate interval or scale"));
    }

    let data = &block[MOMENT_HEADER_LEN..];
    let raw: Vec<u16> = match word_size {
        8 => data
            .get(..gates)
            .ok_or_else(|| truncated("moment data"))?
            .iter()
            .map(|&b| u16::from(b))
            .collect(),
        16 => (0..gates)
            .map(|g| be_u16(data, 2 * g))
            .collect::<Option<_>>()
            .ok_or_else(|| truncated("moment data"))?,
        other => return Err(decode_err(format!("unsupported data word size {other}"))),
    };

    let values = raw
        .into_iter()
        .map(|r| (r > 1).then(|| (f64::from(r) - offset) / scale))
        .collect();
    Ok(Moment {
        first_gate_m,
        gate_interval_m,
        values,
    })
}

// ============================================================================
// Grid assembly
// ============================================================================

/// Range axis shared by every moment: nearest first gate, finest spacing,
/// out to the farthest gate.
#[derive(Debug, Clone, Copy)]
struct RangeAxis {
    first_m: u16,
    interval_m: u16,
    gates: usize,
}

impl RangeAxis {
    fn spanning(radials: &[Radial]) -> Self {
        let moments = || {
            radials
                .iter()
                .flat_map(|r| [r.reflectivity.as_ref(), r.velocity.as_ref()])
                .flatten()
        };
        let first_m = moments().map(|m| m.first_gate_m).min().unwrap_or_default();
        let interval_m = moments().map(|m| m.gate_interval_m).min().unwrap_or(1);
        let last = moments()
            .filter(|m| !m.values.is_empty())
            .map(|m| usize::from(m.first_gate_m) + (m.values.len() - 1) * usize::from(m.gate_interval_m))
            .max();
        let gates = last.map_or(0, |l| (l - usize::from(first_m)) / usize::from(interval_m) + 1);
        Self {
            first_m,
            interval_m,
            gates,
        }
    }

    /// Slant range of every gate (m).
    fn ranges(self) -> Vec<f64> {
        let mut range = f64::from(self.first_m);
        let mut out = Vec::with_capacity(self.gates);
        for _ in 0..self.gates {
            out.push(range);
            range += f64::from(self.interval_m);
        }
        out
    }

    /// Place `moment` on this axis, masking gates it does not cover.
    fn resample(self, moment: Option<&Moment>) -> Vec<Option<f64>> {
        let mut row = vec![None; self.gates];
        if let Some(m) = moment {
            let first = usize::from(m.first_gate_m) - usize::from(self.first_m);
            for (k, value) in m.values.iter().enumerate() {
                let idx = (first + k * usize::from(m.gate_interval_m)) / usize::from(self.interval_m);
                if let Some(cell) = row.get_mut(idx) {
                    *cell = *value;
                }
            }
        }
        row
    }
}

/// Ground position of a gate at slant range `range_m` along a beam.
fn gate_position(site: (f64, f64), azimuth_deg: f64, elevation_deg: f64, range_m: f64) -> (f64, f64) {
    let el = elevation_deg.to_radians();
    let r = EFFECTIVE_RADIUS_M;
    let height = range_m.mul_add(range_m, r * r + 2.0 * range_m * r * el.sin()).sqrt() - r;
    let surface = r * (range_m * el.cos() / (r + height)).asin();

    let az = azimuth_deg.to_radians();
    let (x, y) = (surface * az.sin(), surface * az.cos());
    let lat = site.0 + (y / EARTH_RADIUS_M).to_degrees();
    let lon = site.1 + (x / (EARTH_RADIUS_M * site.0.to_radians().cos())).to_degrees();
    (lat, lon)
}

fn build_grid(radials: &[Radial], site: (f64, f64), scan_time: Option<DateTime<Utc>>) -> MomentGrid {
    let axis = RangeAxis::spanning(radials);
    let ranges = axis.ranges();

    let mut velocity: MomentField = Vec::with_capacity(radials.len());
    let mut reflectivity: MomentField = Vec::with_capacity(radials.len());
    let mut latitude = Vec::with_capacity(radials.len());
    let mut longitude = Vec::with_capacity(radials.len());

    for radial in radials {
        velocity.push(axis.resample(radial.velocity.as_ref()));
        reflectivity.push(axis.resample(radial.reflectivity.as_ref()));
        let (lats, lons): (Vec<f64>, Vec<f64>) = ranges
            .iter()
            .map(|&r| gate_position(site, radial.azimuth_deg, radial.elevation_deg, r))
            .unzip();
        latitude.push(lats);
        longitude.push(lons);
    }

    MomentGrid {
        velocity: Some(velocity),
        reflectivity: Some(reflectivity),
        latitude: Some(latitude),
        longitude: Some(longitude),
        scan_time,
    }
}
