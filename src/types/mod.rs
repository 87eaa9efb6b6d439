//! Shared data structures for the signature pipeline
//!
//! - `MomentGrid`: Level II polar moment grid (scanner input)
//! - `Signature`: unified, provenance-tagged output record

mod grid;
mod signature;

pub use grid::*;
pub use signature::*;
