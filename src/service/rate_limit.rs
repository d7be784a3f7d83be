//! Per-rater request limiter for the HTTP adapter
//!
//! A keyed GCRA limiter from `governor`: each rater may burst up to
//! `max_requests` and regains one request every `window / max_requests`.
//! Idle raters are dropped explicitly by [`RaterRateLimiter::evict_expired`],
//! which the service runs on a timer.

use crate::config::RateLimitSettings;
use crate::error::{CoreResult, RoundError};
use anyhow::{anyhow, Result};
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::debug;

type KeyedLimiter<C> =
    RateLimiter<String, DefaultKeyedStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

pub struct RaterRateLimiter<C: Clock = DefaultClock> {
    limiter: KeyedLimiter<C>,
    max_requests: u32,
}

impl RaterRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Result<Self> {
        Ok(Self {
            limiter: RateLimiter::keyed(rater_quota(max_requests, window)?),
            max_requests,
        })
    }

    pub fn from_settings(settings: &RateLimitSettings) -> Result<Self> {
        Self::new(
            settings.max_requests,
            Duration::from_secs(settings.window_seconds),
        )
    }
}

impl<C: Clock> RaterRateLimiter<C> {
    /// Limiter driven by `clock` instead of the wall clock
    pub fn with_clock(max_requests: u32, window: Duration, clock: &C) -> Result<Self> {
        let quota = rater_quota(max_requests, window)?;
        Ok(Self {
            limiter: RateLimiter::new(quota, DefaultKeyedStateStore::default(), clock),
            max_requests,
        })
    }

    /// Count one request for `rater_id`
    pub fn check(&self, rater_id: &str) -> CoreResult<()> {
        self.limiter
            .check_key(&rater_id.to_string())
            .map_err(|_| {
                debug!("Rater {} over {} requests", rater_id, self.max_requests);
                RoundError::RateLimited {
                    profile_id: rater_id.to_string(),
                }
            })
    }

    /// Drop raters whose budget is fully replenished, returning how many went
    pub fn evict_expired(&self) -> usize {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        before.saturating_sub(self.limiter.len())
    }

    pub fn len(&self) -> usize {
        self.limiter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiter.is_empty()
    }
}

impl<C: Clock> std::fmt::Debug for RaterRateLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaterRateLimiter")
            .field("max_requests", &self.max_requests)
            .field("tracked_raters", &self.limiter.len())
            .finish()
    }
}

/// `max_requests` per `window`, all of them usable in one burst
fn rater_quota(max_requests: u32, window: Duration) -> Result<Quota> {
    let burst = NonZeroU32::new(max_requests)
        .ok_or_else(|| anyhow!("Rate limit must allow at least one request"))?;
    let period = window / max_requests;
    Quota::with_period(period)
        .map(|quota| quota.allow_burst(burst))
        .ok_or_else(|| anyhow!("Rate limit window must be longer than zero"))
}
