//! Moment file → [`MomentGrid`]
//!
//! [`VolumeDecoder`] is the production entry point: it sniffs the file and
//! hands it to the Archive II or JSON decoder.
//!
//! Decoding runs on a blocking thread (see the aggregator), so decoders are
//! plain synchronous code.

use crate::sources::archive2::{Archive2Decoder, ARCHIVE2_MAGIC};
use crate::sources::MomentFile;
use crate::types::{GridShapeError, MomentGrid};
use std::fs::File;
use std::io::{BufReader, Read};
use tracing::debug;

/// Turns a downloaded moment file into an in-memory grid.
pub trait GridDecoder: Send + Sync + 'static {
    fn decode(&self, file: &MomentFile) -> Result<MomentGrid, GridShapeError>;
}

/// Reads the JSON grid export: `velocity`, `reflectivity`, `latitude` and
/// `longitude` as sweep × gate arrays with `null` for masked cells, plus an
/// optional RFC 3339 `scan_time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonGridDecoder;

impl GridDecoder for JsonGridDecoder {
    fn decode(&self, file: &MomentFile) -> Result<MomentGrid, GridShapeError> {
        let handle = File::open(&file.path)
            .map_err(|e| GridShapeError::Decode(format!("{}: {e}", file.path.display())))?;
        serde_json::from_reader(BufReader::new(handle))
            .map_err(|e| GridShapeError::Decode(format!("{}: {e}", file.path.display())))
    }
}

/// Picks the decoder from the file's leading bytes: Archive II volumes go
/// to [`Archive2Decoder`], anything else is read as a JSON grid export.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeDecoder;

impl GridDecoder for VolumeDecoder {
    fn decode(&self, file: &MomentFile) -> Result<MomentGrid, GridShapeError> {
        let mut magic = [0u8; 4];
        let archive = File::open(&file.path)
            .and_then(|mut f| f.read_exact(&mut magic))
            .is_ok_and(|()| &magic == ARCHIVE2_MAGIC);

        debug!(key = %file.key, archive, "Decoding moment file");
        if archive {
            Archive2Decoder.decode(file)
        } else {
            JsonGridDecoder.decode(file)
        }
    }
}
