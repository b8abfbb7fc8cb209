//! Admission backend trait for abstracting over limiter collections.

use async_trait::async_trait;

use super::limiter::Decision;
use crate::error::Result;

/// Trait for rate limiter implementations.
///
/// The admission layer is generic over this trait so that request handlers
/// do not depend on how policies are stored.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Evaluate one request from `identifier` under the named policy.
    async fn check(&self, policy: &str, identifier: &str) -> Result<Decision>;
}
