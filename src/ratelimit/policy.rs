//! Named rate limit policies.
//!
//! Every policy owns one long-lived [`RateLimiter`]. Policies never share
//! buckets: an identifier drained under `strict` is untouched under `default`.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::backend::AdmissionBackend;
use super::limiter::{Decision, RateLimiter, Status};
use crate::clock::{Clock, SystemClock};
use crate::config::GateConfig;
use crate::error::{GateError, Result};

/// Allowance of one identifier across every policy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub identifier: String,
    pub policies: BTreeMap<String, Status>,
    /// Epoch seconds at which the report was taken
    pub timestamp: f64,
}

/// The set of configured policies, each backed by its own limiter.
pub struct PolicySet<C: Clock = SystemClock> {
    limiters: BTreeMap<String, Arc<RateLimiter<C>>>,
    default_policy: String,
    clock: C,
}

impl PolicySet {
    /// Build every configured policy on the system clock.
    pub fn from_config(config: &GateConfig) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> PolicySet<C> {
    /// Build every configured policy, all reading time from `clock`.
    pub fn with_clock(config: &GateConfig, clock: C) -> Result<Self> {
        config.validate()?;

        let mut limiters = BTreeMap::new();
        for (name, policy) in &config.policies {
            let limiter = RateLimiter::from_policy(name, policy, &config.eviction, clock.clone())?;
            info!(
                policy = %name,
                requests_per_minute = limiter.requests_per_minute(),
                burst_size = limiter.burst_size(),
                "Rate limit policy configured"
            );
            limiters.insert(name.clone(), Arc::new(limiter));
        }

        Ok(Self {
            limiters,
            default_policy: config.admission.default_policy.clone(),
            clock,
        })
    }
}

impl<C: Clock> PolicySet<C> {
    /// Get the limiter for a policy.
    pub fn get(&self, policy: &str) -> Option<&Arc<RateLimiter<C>>> {
        self.limiters.get(policy)
    }

    /// Get the limiter for the default policy.
    pub fn default_limiter(&self) -> &Arc<RateLimiter<C>> {
        // Presence is checked by `GateConfig::validate` at construction.
        &self.limiters[&self.default_policy]
    }

    /// Name of the default policy.
    pub fn default_policy(&self) -> &str {
        &self.default_policy
    }

    /// Names of every configured policy, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.limiters.keys().map(String::as_str)
    }

    /// Evaluate one request against a named policy.
    pub fn evaluate(&self, policy: &str, identifier: &str) -> Result<Decision> {
        let limiter = self
            .get(policy)
            .ok_or_else(|| GateError::UnknownPolicy(policy.to_string()))?;
        Ok(limiter.evaluate(identifier))
    }

    /// Report the allowance of `identifier` under every policy without
    /// consuming tokens or creating buckets.
    pub fn status(&self, identifier: &str) -> StatusReport {
        let policies = self
            .limiters
            .iter()
            .map(|(name, limiter)| (name.clone(), limiter.peek(identifier)))
            .collect();

        StatusReport {
            identifier: identifier.to_string(),
            policies,
            timestamp: self.clock.now(),
        }
    }

    /// Force an eviction sweep on every policy. Returns the total evicted.
    pub fn sweep(&self) -> usize {
        self.limiters.values().map(|limiter| limiter.sweep()).sum()
    }
}

#[async_trait]
impl<C: Clock> AdmissionBackend for PolicySet<C> {
    async fn check(&self, policy: &str, identifier: &str) -> Result<Decision> {
        self.evaluate(policy, identifier)
    }
}
