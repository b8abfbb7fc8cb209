//! Rate limiting logic and state management.

mod backend;
mod bucket;
mod limiter;
mod policy;

pub use backend::AdmissionBackend;
pub use bucket::TokenBucket;
pub use limiter::{Decision, RateLimiter, Status};
pub use policy::{PolicySet, StatusReport};

pub(crate) use limiter::resolve_burst;
