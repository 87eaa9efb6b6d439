//! Rate-limited, single-flight cache in front of one source fetcher
//!
//! ## Read path
//!
//! A fresh entry is read through an [`ArcSwapOption`] without taking any
//! lock, so concurrent readers of a warm cache never wait on each other.
//!
//! ## Fill path
//!
//! On a miss the caller takes the per-cache fill lock and checks again: a
//! concurrent caller may have published an entry while this one waited.
//! Only the caller that still sees a miss calls the fetcher, so N cold
//! callers produce one upstream fetch and all observe the same entry.
//!
//! The filling caller:
//! 1. calls the fetcher under the fetch deadline, retrying a 429 a bounded
//!    number of times after a fixed backoff;
//! 2. publishes the outcome, success or failure (failures with the shorter
//!    failure TTL so a failing upstream is not hammered);
//! 3. cools down while still holding the lock when the vendor reports that
//!    its per-minute budget is nearly spent.
//!
//! Cancelling the filling caller publishes a `Cancelled` failure entry and
//! releases the lock, so waiters are never left blocked.

use crate::config::CacheConfig;
use crate::sources::{FetchError, FetchResponse, RateLimitState, SourceFetcher};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Timing and rate-limit knobs for one cache.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl: Duration,
    pub failure_ttl: Duration,
    pub fetch_deadline: Duration,
    pub rate_limit_floor: i64,
    pub cooldown: Duration,
    pub rate_limit_retries: u32,
    pub rate_limit_backoff: Duration,
}

impl From<&CacheConfig> for CachePolicy {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            ttl: cfg.ttl(),
            failure_ttl: cfg.failure_ttl(),
            fetch_deadline: cfg.fetch_deadline(),
            rate_limit_floor: cfg.rate_limit_floor,
            cooldown: cfg.cooldown(),
            rate_limit_retries: cfg.rate_limit_retries,
            rate_limit_backoff: cfg.rate_limit_backoff(),
        }
    }
}

/// A payload served from the cache.
#[derive(Debug)]
pub struct Cached<P> {
    pub payload: Arc<P>,
    /// HTTP-equivalent status recorded with the entry
    pub status: u16,
}

impl<P> Clone for Cached<P> {
    fn clone(&self) -> Self {
        Self {
            payload: Arc::clone(&self.payload),
            status: self.status,
        }
    }
}

/// Expiry used when `now + ttl` is not representable.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `now + ttl`, saturating to [`FAR_FUTURE`] instead of overflowing.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// One published fetch outcome.
#[derive(Debug)]
pub struct CacheEntry<P> {
    outcome: Result<Cached<P>, FetchError>,
    rate_limit: Option<RateLimitState>,
    fetched_at: DateTime<Utc>,
    stored: Instant,
    expires: Instant,
}

impl<P> CacheEntry<P> {
    fn success(response: FetchResponse<P>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            outcome: Ok(Cached {
                payload: Arc::new(response.payload),
                status: response.status,
            }),
            rate_limit: response.rate_limit,
            fetched_at: Utc::now(),
            stored: now,
            expires: expiry(now, ttl),
        }
    }

    fn failure(error: FetchError, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            outcome: Err(error),
            rate_limit: None,
            fetched_at: Utc::now(),
            stored: now,
            expires: expiry(now, ttl),
        }
    }

    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires
    }

    fn outcome(&self) -> Result<Cached<P>, FetchError> {
        self.outcome.clone()
    }

    /// Status the entry was stored with (the error's status for failures).
    pub fn status(&self) -> Option<u16> {
        match &self.outcome {
            Ok(cached) => Some(cached.status),
            Err(e) => e.status(),
        }
    }
}

/// Serialisable view of a cache for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub source: String,
    /// `empty`, `fresh` or `expired`
    pub state: &'static str,
    pub last_status: Option<u16>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub expires_in_secs: Option<u64>,
    pub cached_error: Option<String>,
    pub rate_limit: Option<RateLimitState>,
    /// Upstream fetch calls made since startup
    pub fetch_calls: u64,
}

pub struct RateLimitedCache<P> {
    name: String,
    fetcher: Arc<dyn SourceFetcher<Payload = P>>,
    policy: CachePolicy,
    entry: ArcSwapOption<CacheEntry<P>>,
    fill_lock: Mutex<()>,
    fetch_calls: AtomicU64,
}

impl<P: Send + Sync + 'static> RateLimitedCache<P> {
    pub fn new<F>(fetcher: Arc<F>, policy: CachePolicy) -> Self
    where
        F: SourceFetcher<Payload = P>,
    {
        let fetcher: Arc<dyn SourceFetcher<Payload = P>> = fetcher;
        Self {
            name: fetcher.source_name().to_string(),
            fetcher,
            policy,
            entry: ArcSwapOption::empty(),
            fill_lock: Mutex::new(()),
            fetch_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Upstream fetch calls made so far (rate-limit retries included).
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    /// Cached payload, fetching on a miss.
    pub async fn get(&self) -> Result<Cached<P>, FetchError> {
        self.get_with_cancel(&CancellationToken::new()).await
    }

    /// [`get`](Self::get) that gives up when `cancel` fires.
    pub async fn get_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Cached<P>, FetchError> {
        if let Some(entry) = self.fresh_entry() {
            return entry.outcome();
        }

        let _guard = tokio::select! {
            guard = self.fill_lock.lock() => guard,
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        };

        if let Some(entry) = self.fresh_entry() {
            debug!(source = %self.name, "Entry filled by a concurrent caller");
            return entry.outcome();
        }

        let entry = Arc::new(self.fill(cancel).await);
        self.entry.store(Some(Arc::clone(&entry)));

        if let Some(state) = entry.rate_limit {
            if state.near_minute_limit(self.policy.rate_limit_floor) {
                warn!(
                    source = %self.name,
                    remaining_minute = state.remaining_minute,
                    cooldown_ms = u64::try_from(self.policy.cooldown.as_millis()).unwrap_or(u64::MAX),
                    "Approaching per-minute rate limit, cooling down"
                );
                tokio::select! {
                    _ = tokio::time::sleep(self.policy.cooldown) => {}
                    _ = cancel.cancelled() => {}
                }
            }
            if state.period_exhausted() {
                warn!(source = %self.name, "Vendor period quota exhausted");
            }
        }

        entry.outcome()
    }

    /// Drop the current entry; the next `get` fetches.
    pub fn invalidate(&self) {
        self.entry.store(None);
    }

    pub fn snapshot(&self) -> CacheStatus {
        let entry = self.entry.load_full();
        let now = Instant::now();
        let fetch_calls = self.fetch_calls();

        match entry {
            None => CacheStatus {
                source: self.name.clone(),
                state: "empty",
                last_status: None,
                fetched_at: None,
                age_secs: None,
                expires_in_secs: None,
                cached_error: None,
                rate_limit: None,
                fetch_calls,
            },
            Some(entry) => CacheStatus {
                source: self.name.clone(),
                state: if entry.is_fresh() { "fresh" } else { "expired" },
                last_status: entry.status(),
                fetched_at: Some(entry.fetched_at),
                age_secs: Some(now.saturating_duration_since(entry.stored).as_secs()),
                expires_in_secs: Some(entry.expires.saturating_duration_since(now).as_secs()),
                cached_error: entry.outcome.as_ref().err().map(ToString::to_string),
                rate_limit: entry.rate_limit,
                fetch_calls,
            },
        }
    }

    fn fresh_entry(&self) -> Option<Arc<CacheEntry<P>>> {
        self.entry.load_full().filter(|e| e.is_fresh())
    }

    async fn fill(&self, cancel: &CancellationToken) -> CacheEntry<P> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.fetch_with_rate_limit_retry() => result,
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match result {
            Ok(response) => {
                info!(source = %self.name, status = response.status, elapsed_ms, "Cache filled");
                CacheEntry::success(response, self.policy.ttl)
            }
            Err(e) => {
                warn!(
                    source = %self.name,
                    error = %e,
                    elapsed_ms,
                    failure_ttl_secs = self.policy.failure_ttl.as_secs(),
                    "Fetch failed, caching failure"
                );
                CacheEntry::failure(e, self.policy.failure_ttl)
            }
        }
    }

    /// One fetch under the deadline, plus bounded retries on 429.
    async fn fetch_with_rate_limit_retry(&self) -> Result<FetchResponse<P>, FetchError> {
        let attempts = 1 + self.policy.rate_limit_retries;
        let mut attempt = 1;

        loop {
            self.fetch_calls.fetch_add(1, Ordering::Relaxed);
            let result =
                match tokio::time::timeout(self.policy.fetch_deadline, self.fetcher.fetch()).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(self.policy.fetch_deadline)),
                };

            match result {
                Err(e) if e.is_rate_limited() && attempt < attempts => {
                    warn!(
                        source = %self.name,
                        attempt,
                        backoff_ms = u64::try_from(self.policy.rate_limit_backoff.as_millis()).unwrap_or(u64::MAX),
                        "Rate limited (429), backing off before retry"
                    );
                    tokio::time::sleep(self.policy.rate_limit_backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::sync::atomic::AtomicUsize;

    type Script = Box<dyn Fn(usize) -> Result<FetchResponse<String>, FetchError> + Send + Sync>;

    struct StubFetcher {
        calls: AtomicUsize,
        delay: Duration,
        script: Script,
    }

    impl StubFetcher {
        fn new(
            delay: Duration,
            script: impl Fn(usize) -> Result<FetchResponse<String>, FetchError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                script: Box::new(script),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SourceFetcher for StubFetcher {
        type Payload = String;

        async fn fetch(&self) -> Result<FetchResponse<String>, FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            (self.script)(n)
        }

        fn source_name(&self) -> &str {
            "stub"
        }
    }

    fn policy() -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_secs(60),
            failure_ttl: Duration::from_secs(5),
            fetch_deadline: Duration::from_secs(5),
            rate_limit_floor: 5,
            cooldown: Duration::from_millis(200),
            rate_limit_retries: 1,
            rate_limit_backoff: Duration::from_millis(50),
        }
    }

    fn ok(body: &str) -> Result<FetchResponse<String>, FetchError> {
        Ok(FetchResponse::ok(body.to_string()))
    }

    fn cache_for(stub: &Arc<StubFetcher>, policy: CachePolicy) -> RateLimitedCache<String> {
        RateLimitedCache::new(stub.clone(), policy)
    }

    #[tokio::test]
    async fn test_hit_serves_same_payload_without_refetch() {
        let stub = StubFetcher::new(Duration::ZERO, |_| ok("cells"));
        let cache = cache_for(&stub, policy());

        let first = cache.get().await.unwrap();
        let second = cache.get().await.unwrap();

        assert_eq!(stub.calls(), 1);
        assert!(Arc::ptr_eq(&first.payload, &second.payload));
        assert_eq!(first.status, 200);
        assert_eq!(cache.snapshot().state, "fresh");
    }

    #[tokio::test]
    async fn test_cold_callers_share_one_fetch() {
        let stub = StubFetcher::new(Duration::from_millis(100), |_| ok("cells"));
        let cache = Arc::new(cache_for(&stub, policy()));

        let results = join_all((0..16).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get().await })
        }))
        .await;

        assert_eq!(stub.calls(), 1);
        let payloads: Vec<_> = results
            .into_iter()
            .map(|r| r.unwrap().unwrap().payload)
            .collect();
        assert!(payloads.iter().all(|p| Arc::ptr_eq(p, &payloads[0])));
    }

    #[tokio::test]
    async fn test_failure_is_cached_for_failure_ttl() {
        let stub = StubFetcher::new(Duration::ZERO, |_| {
            Err(FetchError::Status {
                status: 503,
                message: "Service Unavailable".to_string(),
            })
        });
        let cache = cache_for(&stub, policy());

        assert!(cache.get().await.is_err());
        let err = cache.get().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(stub.calls(), 1);

        let status = cache.snapshot();
        assert_eq!(status.last_status, Some(503));
        assert!(status.cached_error.is_some());
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let stub = StubFetcher::new(Duration::ZERO, |n| ok(&format!("volume-{n}")));
        let cache = cache_for(
            &stub,
            CachePolicy {
                ttl: Duration::from_millis(30),
                ..policy()
            },
        );

        assert_eq!(*cache.get().await.unwrap().payload, "volume-0");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*cache.get().await.unwrap().payload, "volume-1");
        assert_eq!(stub.calls(), 2);
    }

    #[tokio::test]
    async fn test_rate_limited_retries_once_after_backoff() {
        let stub = StubFetcher::new(Duration::ZERO, |n| {
            if n == 0 {
                Err(FetchError::RateLimited { reset_at: None })
            } else {
                ok("cells")
            }
        });
        let cache = cache_for(&stub, policy());

        let started = Instant::now();
        let cached = cache.get().await.unwrap();
        assert_eq!(*cached.payload, "cells");
        assert_eq!(stub.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_persistent_rate_limit_gives_up() {
        let stub = StubFetcher::new(Duration::ZERO, |_| {
            Err(FetchError::RateLimited { reset_at: None })
        });
        let cache = cache_for(&stub, policy());

        let err = cache.get().await.unwrap_err();
        assert!(err.is_rate_limited());
        assert_eq!(stub.calls(), 2);
        assert_eq!(cache.fetch_calls(), 2);
    }

    #[tokio::test]
    async fn test_near_limit_cools_down_without_blocking_warm_reads() {
        let stub = StubFetcher::new(Duration::ZERO, |_| {
            Ok(FetchResponse::ok("cells".to_string()).with_rate_limit(RateLimitState {
                remaining_minute: Some(3),
                remaining_period: Some(900),
                reset_at: None,
            }))
        });
        let cache = Arc::new(cache_for(&stub, policy()));

        let filler = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                let started = Instant::now();
                let result = cache.get().await;
                (result, started.elapsed())
            })
        };

        // Entry is published before the cooldown starts.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let warm_started = Instant::now();
        assert!(cache.get().await.is_ok());
        assert!(warm_started.elapsed() < Duration::from_millis(100));

        let (result, elapsed) = filler.await.unwrap();
        assert!(result.is_ok());
        assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_fetch_deadline_caches_timeout() {
        let stub = StubFetcher::new(Duration::from_secs(5), |_| ok("late"));
        let cache = cache_for(
            &stub,
            CachePolicy {
                fetch_deadline: Duration::from_millis(50),
                ..policy()
            },
        );

        let err = cache.get().await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert_eq!(err.status(), Some(504));
    }

    #[tokio::test]
    async fn test_cancellation_releases_waiters() {
        let stub = StubFetcher::new(Duration::from_secs(5), |_| ok("late"));
        let cache = Arc::new(cache_for(&stub, policy()));
        let cancel = CancellationToken::new();

        let filler = {
            let cache = Arc::clone(&cache);
            let cancel = cancel.clone();
            tokio::spawn(async move { cache.get_with_cancel(&cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let filled = tokio::time::timeout(Duration::from_secs(1), filler)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(filled.unwrap_err(), FetchError::Cancelled);

        let waited = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(waited.unwrap_err(), FetchError::Cancelled);
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_huge_ttl_saturates_instead_of_overflowing() {
        let stub = StubFetcher::new(Duration::ZERO, |_| ok("cells"));
        let cache = cache_for(
            &stub,
            CachePolicy {
                ttl: Duration::MAX,
                ..policy()
            },
        );

        cache.get().await.unwrap();
        cache.get().await.unwrap();
        assert_eq!(stub.calls(), 1);
        assert_eq!(cache.snapshot().state, "fresh");
    }

    #[test]
    fn test_expiry_saturates() {
        let now = Instant::now();
        assert_eq!(expiry(now, Duration::from_secs(5)), now + Duration::from_secs(5));
        assert!(expiry(now, Duration::MAX) > now + Duration::from_secs(365 * 24 * 60 * 60));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let stub = StubFetcher::new(Duration::ZERO, |_| ok("cells"));
        let cache = cache_for(&stub, policy());

        assert_eq!(cache.snapshot().state, "empty");
        cache.get().await.unwrap();
        cache.invalidate();
        assert_eq!(cache.snapshot().state, "empty");
        cache.get().await.unwrap();
        assert_eq!(stub.calls(), 2);
    }
}
