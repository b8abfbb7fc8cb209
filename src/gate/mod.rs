//! Admission layer consumed by transport front ends.
//!
//! Transports (HTTP handlers, proxies) identify the caller, ask the
//! [`AdmissionService`] for an [`Admission`], and either proceed with the
//! request or answer with the rejection it describes.

mod identity;
mod service;

pub use identity::{client_identifier, RequestHeaders, UNKNOWN_CLIENT};
pub use service::{
    rate_limit_headers, Admission, AdmissionService, Rejection, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER, TOO_MANY_REQUESTS,
};
