//! Vendor rate-limit metadata
//!
//! Read from three response headers after every successful call. The state
//! is advisory: it decides whether the fill path cools down before the next
//! call, never whether the current response is accepted.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Serialize;

pub const REMAINING_MINUTE_HEADER: &str = "x-ratelimit-remaining-minute";
pub const REMAINING_PERIOD_HEADER: &str = "x-ratelimit-remaining-period";
pub const RESET_MINUTE_HEADER: &str = "x-ratelimit-reset-minute";

/// Values above this are epoch seconds, below are seconds-until-reset.
const EPOCH_CUTOFF: i64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    pub remaining_minute: Option<i64>,
    pub remaining_period: Option<i64>,
    pub reset_at: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Parse the rate-limit headers. Returns `None` when none are present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let int = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<i64>().ok())
        };

        let state = Self {
            remaining_minute: int(REMAINING_MINUTE_HEADER),
            remaining_period: int(REMAINING_PERIOD_HEADER),
            reset_at: int(RESET_MINUTE_HEADER).and_then(reset_instant),
        };

        if state == Self::default() {
            None
        } else {
            Some(state)
        }
    }

    /// True when the per-minute budget is at or below `floor`.
    pub fn near_minute_limit(&self, floor: i64) -> bool {
        self.remaining_minute.is_some_and(|r| r <= floor)
    }

    pub fn period_exhausted(&self) -> bool {
        self.remaining_period.is_some_and(|r| r <= 0)
    }
}

fn reset_instant(raw: i64) -> Option<DateTime<Utc>> {
    if raw >= EPOCH_CUTOFF {
        Utc.timestamp_opt(raw, 0).single()
    } else {
        Some(Utc::now() + ChronoDuration::seconds(raw.max(0)))
    }
}
