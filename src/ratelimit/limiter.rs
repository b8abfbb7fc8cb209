//! Core rate limiter implementation.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use crate::clock::{Clock, SystemClock};
use crate::config::{EvictionConfig, PolicyConfig};
use crate::error::{GateError, Result};

/// The outcome of evaluating one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left after this evaluation
    pub remaining: u32,
    /// Bucket capacity (burst size)
    pub capacity: u32,
    /// Epoch seconds at which a token is next available
    pub reset_time: f64,
    /// Seconds a denied caller should wait; `0` when allowed
    pub retry_after: u64,
}

/// A read-only view of an identifier's allowance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Status {
    /// Whole tokens the identifier could spend right now
    pub remaining_requests: u32,
    /// Bucket capacity (burst size)
    pub capacity: u32,
    /// Sustained rate the bucket refills at
    pub refill_rate_per_minute: f64,
}

/// A token bucket rate limiter keyed by caller identifier.
///
/// Buckets are created on first sight of an identifier and evicted once they
/// have not been touched for the stale threshold. Eviction piggybacks on
/// [`evaluate`](Self::evaluate) at most once per cleanup interval; no
/// background task is involved.
///
/// This struct is thread-safe and is meant to be shared behind an `Arc`.
/// Each bucket is refilled and consumed under its map shard's write lock, so
/// concurrent evaluations of one identifier never over-admit.
pub struct RateLimiter<C: Clock = SystemClock> {
    /// Buckets indexed by caller identifier
    buckets: DashMap<String, TokenBucket>,
    /// Sustained rate
    requests_per_minute: f64,
    /// Capacity of every bucket
    burst_size: u32,
    /// Sweep cadence and staleness cutoff
    eviction: EvictionConfig,
    /// Timestamp of the last sweep
    last_cleanup: Mutex<f64>,
    clock: C,
}

impl RateLimiter {
    /// Create a rate limiter on the system clock with default eviction.
    ///
    /// `burst_size` defaults to `requests_per_minute` when `None`.
    pub fn new(requests_per_minute: f64, burst_size: Option<u32>) -> Result<Self> {
        Self::with_clock(requests_per_minute, burst_size, SystemClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    /// Create a rate limiter reading time from `clock`.
    pub fn with_clock(requests_per_minute: f64, burst_size: Option<u32>, clock: C) -> Result<Self> {
        let burst_size =
            resolve_burst(requests_per_minute, burst_size).map_err(GateError::Config)?;
        Ok(Self::build(requests_per_minute, burst_size, clock))
    }

    /// Create a rate limiter for a named, configured policy.
    pub fn from_policy(
        name: &str,
        policy: &PolicyConfig,
        eviction: &EvictionConfig,
        clock: C,
    ) -> Result<Self> {
        let burst_size = resolve_burst(policy.requests_per_minute, policy.burst_size).map_err(
            |reason| GateError::InvalidPolicy {
                policy: name.to_string(),
                reason,
            },
        )?;
        Ok(Self::build(policy.requests_per_minute, burst_size, clock).with_eviction(eviction.clone()))
    }

    fn build(requests_per_minute: f64, burst_size: u32, clock: C) -> Self {
        let now = clock.now();
        Self {
            buckets: DashMap::new(),
            requests_per_minute,
            burst_size,
            eviction: EvictionConfig::default(),
            last_cleanup: Mutex::new(now),
            clock,
        }
    }

    /// Replace the eviction policy.
    pub fn with_eviction(mut self, eviction: EvictionConfig) -> Self {
        self.eviction = eviction;
        self
    }

    /// Evaluate one request from `identifier`, consuming a token if available.
    pub fn evaluate(&self, identifier: &str) -> Decision {
        let now = self.clock.now();
        self.maybe_sweep(now);

        trace!(identifier = %identifier, "Evaluating request");

        let decision = {
            let mut bucket = self
                .buckets
                .entry(identifier.to_string())
                .or_insert_with(|| {
                    debug!(
                        identifier = %identifier,
                        capacity = self.burst_size,
                        requests_per_minute = self.requests_per_minute,
                        "Creating new token bucket"
                    );
                    TokenBucket::new(self.burst_size, self.refill_rate(), now)
                });

            let allowed = bucket.consume(1, now);
            let time_to_next_token = if allowed {
                0.0
            } else {
                bucket.time_to_next_token()
            };

            Decision {
                allowed,
                remaining: bucket.tokens().floor() as u32,
                capacity: bucket.capacity(),
                reset_time: now + time_to_next_token,
                retry_after: if allowed {
                    0
                } else {
                    (time_to_next_token.floor() as u64).saturating_add(1)
                },
            }
        };

        if !decision.allowed {
            debug!(
                identifier = %identifier,
                retry_after = decision.retry_after,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Report the allowance of `identifier` without consuming or creating.
    ///
    /// Unknown identifiers report a full bucket. Known buckets report the
    /// balance they would hold now; their refill clock is not advanced.
    pub fn peek(&self, identifier: &str) -> Status {
        let now = self.clock.now();
        let remaining_requests = match self.buckets.get(identifier) {
            Some(bucket) => bucket.projected_tokens(now).floor() as u32,
            None => self.burst_size,
        };

        Status {
            remaining_requests,
            capacity: self.burst_size,
            refill_rate_per_minute: self.requests_per_minute,
        }
    }

    /// Run the eviction sweep now, regardless of when it last ran.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut last_cleanup = self.last_cleanup.lock();
        let evicted = self.evict_stale(now);
        *last_cleanup = now;
        evicted
    }

    /// Sweep if the cleanup interval has elapsed. A sweep already running on
    /// another thread counts as this call's sweep.
    fn maybe_sweep(&self, now: f64) {
        let Some(mut last_cleanup) = self.last_cleanup.try_lock() else {
            return;
        };
        if now - *last_cleanup < self.eviction.cleanup_interval_secs as f64 {
            return;
        }

        self.evict_stale(now);
        *last_cleanup = now;
    }

    fn evict_stale(&self, now: f64) -> usize {
        let cutoff = now - self.eviction.stale_threshold_secs as f64;
        let mut evicted = 0;
        self.buckets.retain(|_, bucket| {
            let keep = bucket.last_refill() >= cutoff;
            if !keep {
                evicted += 1;
            }
            keep
        });

        debug!(
            evicted = evicted,
            remaining = self.buckets.len(),
            "Swept stale token buckets"
        );
        evicted
    }

    /// Get a copy of the bucket for `identifier`, if one exists.
    pub fn bucket(&self, identifier: &str) -> Option<TokenBucket> {
        self.buckets.get(identifier).map(|b| b.value().clone())
    }

    /// Get the number of tracked identifiers.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Clear all buckets.
    pub fn clear(&self) {
        self.buckets.clear();
    }

    /// Get the configured sustained rate.
    pub fn requests_per_minute(&self) -> f64 {
        self.requests_per_minute
    }

    /// Get the configured burst size.
    pub fn burst_size(&self) -> u32 {
        self.burst_size
    }

    /// Tokens credited per second.
    pub fn refill_rate(&self) -> f64 {
        self.requests_per_minute / 60.0
    }

    /// Get the eviction policy.
    pub fn eviction(&self) -> &EvictionConfig {
        &self.eviction
    }
}

/// Validate a rate/burst pair and apply the burst default.
pub(crate) fn resolve_burst(
    requests_per_minute: f64,
    burst_size: Option<u32>,
) -> std::result::Result<u32, String> {
    if !requests_per_minute.is_finite() || requests_per_minute <= 0.0 {
        return Err(format!(
            "requests_per_minute must be a positive number, got {}",
            requests_per_minute
        ));
    }
    // Subnormal rates round to a zero or inexact refill rate.
    if !(requests_per_minute / 60.0).is_normal() {
        return Err(format!(
            "requests_per_minute {} is too small to refill a bucket",
            requests_per_minute
        ));
    }

    let burst = match burst_size {
        Some(burst) => burst,
        None if requests_per_minute > u32::MAX as f64 => u32::MAX,
        None => requests_per_minute.floor() as u32,
    };
    if burst == 0 {
        return Err(match burst_size {
            Some(_) => "burst_size must be positive".to_string(),
            None => format!(
                "burst_size defaults to requests_per_minute ({}), which is below one request",
                requests_per_minute
            ),
        });
    }

    Ok(burst)
}
