//! Tollgate - Per-caller request admission
//!
//! This crate implements a token bucket rate limiter that decides, per caller
//! identifier, whether a request may proceed. Buckets refill lazily from
//! elapsed wall-clock time and idle buckets are swept without a background
//! task. A thin admission layer maps decisions onto HTTP-style outcomes.

pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod ratelimit;
