//! Admission service: turns rate limit decisions into request outcomes.

use std::net::IpAddr;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, instrument, warn};

use super::identity::{client_identifier, RequestHeaders};
use crate::error::Result;
use crate::ratelimit::{AdmissionBackend, Decision};

/// Remaining whole requests in the caller's bucket.
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
/// Epoch seconds at which the next token becomes available.
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
/// Seconds a rejected caller should wait before retrying.
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Status code of a rate limited response.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Body of a rate limited response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
}

impl Rejection {
    fn new(retry_after: u64) -> Self {
        Self {
            error: "Rate limit exceeded".to_string(),
            message: format!("Too many requests. Try again in {} seconds.", retry_after),
            retry_after,
        }
    }
}

/// What the transport layer should do with a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Admission {
    /// Let the request through, attaching `headers` to the response.
    Proceed {
        identifier: String,
        headers: Vec<(String, String)>,
    },
    /// Answer with `status`, `headers` and `body` instead of handling it.
    Reject {
        identifier: String,
        status: u16,
        headers: Vec<(String, String)>,
        body: Rejection,
    },
}

impl Admission {
    /// Build the outcome for a decision already taken for `identifier`.
    pub fn from_decision(identifier: impl Into<String>, decision: &Decision) -> Self {
        let identifier = identifier.into();
        if decision.allowed {
            Admission::Proceed {
                identifier,
                headers: rate_limit_headers(decision),
            }
        } else {
            Admission::Reject {
                identifier,
                status: TOO_MANY_REQUESTS,
                headers: rate_limit_headers(decision),
                body: Rejection::new(decision.retry_after),
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Proceed { .. })
    }

    pub fn identifier(&self) -> &str {
        match self {
            Admission::Proceed { identifier, .. } | Admission::Reject { identifier, .. } => {
                identifier
            }
        }
    }

    pub fn headers(&self) -> &[(String, String)] {
        match self {
            Admission::Proceed { headers, .. } | Admission::Reject { headers, .. } => headers,
        }
    }

    /// First value of the response header `name`, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response headers describing a decision.
///
/// Every response carries the remaining allowance and reset time; rejected
/// responses also carry `Retry-After`.
pub fn rate_limit_headers(decision: &Decision) -> Vec<(String, String)> {
    let mut headers = vec![
        (HEADER_REMAINING.to_string(), decision.remaining.to_string()),
        (
            HEADER_RESET.to_string(),
            (decision.reset_time as i64).to_string(),
        ),
    ];
    if !decision.allowed {
        headers.push((
            HEADER_RETRY_AFTER.to_string(),
            decision.retry_after.to_string(),
        ));
    }
    headers
}

/// Admission entry point for a transport layer.
pub struct AdmissionService<B: AdmissionBackend> {
    backend: Arc<B>,
}

impl<B: AdmissionBackend> AdmissionService<B> {
    /// Create a new AdmissionService over the given backend.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Get the backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Decide whether a request may proceed under `policy`.
    ///
    /// The caller is identified from forwarding headers, falling back to
    /// the peer address.
    #[instrument(skip_all, fields(policy = %policy))]
    pub async fn admit(
        &self,
        policy: &str,
        headers: &RequestHeaders,
        peer: Option<IpAddr>,
    ) -> Result<Admission> {
        let identifier = client_identifier(headers, peer);
        self.admit_identifier(policy, &identifier).await
    }

    /// Decide whether a request from an already known identifier may proceed.
    pub async fn admit_identifier(&self, policy: &str, identifier: &str) -> Result<Admission> {
        let decision = self.backend.check(policy, identifier).await?;

        if decision.allowed {
            debug!(
                policy = %policy,
                identifier = %identifier,
                remaining = decision.remaining,
                "Request admitted"
            );
        } else {
            warn!(
                policy = %policy,
                identifier = %identifier,
                retry_after = decision.retry_after,
                "Request rejected by rate limit"
            );
        }

        Ok(Admission::from_decision(identifier, &decision))
    }
}
