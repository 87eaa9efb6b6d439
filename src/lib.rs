//! StormSlide: unified Level II / Level III tornadic signature feed
//!
//! Merges two independently-updated radar sources into one list of
//! candidate tornadic signatures with provenance.
//!
//! ## Architecture
//!
//! - **Scanner**: velocity-couplet detection over a Level II moment grid
//! - **Normalizer**: structural recognition of the vendor's Level III shapes
//! - **Sources**: object-store and vendor fetchers with transport retry
//! - **Cache**: per-source TTL cache with single-flight fills and
//!   rate-limit cooperation
//! - **Aggregator**: concurrent fetch of both sources and merge
//! - **API**: axum surface for the map frontend

pub mod aggregator;
pub mod api;
pub mod cache;
pub mod config;
pub mod normalizer;
pub mod scanner;
pub mod sources;
pub mod types;

pub use aggregator::{AggregateError, Aggregator};
pub use cache::{CachePolicy, CacheStatus, RateLimitedCache};
pub use config::AppConfig;
pub use sources::{FetchError, SourceFetcher};
pub use types::{MomentGrid, ObservedAt, Signature, SignatureKind, SignatureSource};
