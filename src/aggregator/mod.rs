//! Signature aggregator
//!
//! Pulls both sources through their caches concurrently, turns each payload
//! into signatures and concatenates them, Level II first. A source that
//! fails contributes nothing; the call only fails when both sources hit a
//! genuine fetch error, or when the Level II failure policy is `Fail` and
//! Level II could not be fetched.

use crate::cache::{CacheStatus, RateLimitedCache};
use crate::config::{Level2FailurePolicy, ScanConfig};
use crate::normalizer;
use crate::scanner;
use crate::sources::{FetchError, GridDecoder, Level3Response, MomentFile};
use crate::types::{GridShapeError, Signature};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AggregateError {
    #[error("no radar data available (Level II: {level2}; Level III: {level3})")]
    AllSourcesFailed {
        level2: FetchError,
        level3: FetchError,
    },

    #[error("Level II data unavailable: {0}")]
    Level2Unavailable(FetchError),
}

pub struct Aggregator {
    level2: Arc<RateLimitedCache<MomentFile>>,
    level3: Arc<RateLimitedCache<Level3Response>>,
    decoder: Arc<dyn GridDecoder>,
    scan: ScanConfig,
    level2_failure: Level2FailurePolicy,
}

impl Aggregator {
    pub fn new(
        level2: Arc<RateLimitedCache<MomentFile>>,
        level3: Arc<RateLimitedCache<Level3Response>>,
        decoder: Arc<dyn GridDecoder>,
    ) -> Self {
        Self {
            level2,
            level3,
            decoder,
            scan: ScanConfig::default(),
            level2_failure: Level2FailurePolicy::default(),
        }
    }

    pub fn with_scan_config(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    pub fn with_level2_failure(mut self, policy: Level2FailurePolicy) -> Self {
        self.level2_failure = policy;
        self
    }

    pub async fn get_signatures(&self) -> Result<Vec<Signature>, AggregateError> {
        self.get_signatures_with_cancel(&CancellationToken::new())
            .await
    }

    /// One aggregation cycle; `cancel` aborts both in-flight fetches.
    pub async fn get_signatures_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signature>, AggregateError> {
        let (level2, level3) = tokio::join!(
            self.level2_signatures(cancel),
            self.level3_signatures(cancel)
        );

        match (level2, level3) {
            (Err(level2), Err(level3)) => {
                warn!(level2 = %level2, level3 = %level3, "Both radar sources failed");
                Err(AggregateError::AllSourcesFailed { level2, level3 })
            }
            (Err(e), _) if self.level2_failure == Level2FailurePolicy::Fail => {
                Err(AggregateError::Level2Unavailable(e))
            }
            (level2, level3) => {
                let level2 = level2.unwrap_or_default();
                let level3 = level3.unwrap_or_default();
                info!(
                    level2 = level2.len(),
                    level3 = level3.len(),
                    "Aggregated signatures"
                );
                let mut merged = level2;
                merged.extend(level3);
                Ok(merged)
            }
        }
    }

    /// Fetch both sources without scanning; used to keep caches warm.
    pub async fn prefetch(&self, cancel: &CancellationToken) {
        let (level2, level3) = tokio::join!(
            self.level2.get_with_cancel(cancel),
            self.level3.get_with_cancel(cancel)
        );
        debug!(
            level2_ok = level2.is_ok(),
            level3_ok = level3.is_ok(),
            "Cache prefetch complete"
        );
    }

    pub fn source_status(&self) -> Vec<CacheStatus> {
        vec![self.level2.snapshot(), self.level3.snapshot()]
    }

    /// Level II signatures. Only a failed fetch is an error; an undecodable
    /// or malformed grid means no signatures this cycle.
    async fn level2_signatures(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signature>, FetchError> {
        let cached = match self.level2.get_with_cancel(cancel).await {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Level II fetch failed, continuing without Level II");
                return Err(e);
            }
        };

        let decoder = Arc::clone(&self.decoder);
        let file = Arc::clone(&cached.payload);
        let scan = self.scan.clone();
        let scanned = tokio::task::spawn_blocking(move || decode_and_scan(&*decoder, &file, &scan)).await;

        match scanned {
            Ok(Ok(signatures)) => Ok(signatures),
            Ok(Err(e)) => {
                warn!(key = %cached.payload.key, error = %e, "Level II grid unusable, no Level II signatures");
                Ok(Vec::new())
            }
            Err(e) => {
                warn!(error = %e, "Level II scan task failed, no Level II signatures");
                Ok(Vec::new())
            }
        }
    }

    async fn level3_signatures(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Signature>, FetchError> {
        match self.level3.get_with_cancel(cancel).await {
            Ok(cached) => Ok(normalizer::normalize(&cached.payload.data)),
            Err(e) => {
                warn!(error = %e, "Level III fetch failed, continuing without Level III");
                Err(e)
            }
        }
    }
}

fn decode_and_scan(
    decoder: &dyn GridDecoder,
    file: &MomentFile,
    scan: &ScanConfig,
) -> Result<Vec<Signature>, GridShapeError> {
    let mut grid = decoder.decode(file)?;
    if grid.scan_time.is_none() {
        grid.scan_time = file.last_modified;
    }
    scanner::scan(&grid, scan)
}
