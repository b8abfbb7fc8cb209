//! Token bucket implementation.

/// A token bucket tracking the allowance of a single identifier.
///
/// Refill is lazy: there is no background timer, tokens are credited from the
/// elapsed wall-clock time whenever the bucket is touched.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucket {
    /// Maximum tokens held (the burst size)
    capacity: u32,
    /// Currently available tokens, fractional while refilling
    tokens: f64,
    /// Tokens credited per second
    refill_rate: f64,
    /// Epoch seconds of the last refill computation
    last_refill: f64,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64, now: f64) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_rate,
            last_refill: now,
        }
    }

    /// Refill, then take `n` tokens if they are all available.
    ///
    /// Returns `true` if the tokens were taken. A refused call leaves the
    /// balance untouched, but the refill clock still advances to `now`.
    pub fn consume(&mut self, n: u32, now: f64) -> bool {
        self.tokens = self.projected_tokens(now);
        if now > self.last_refill {
            self.last_refill = now;
        }

        let n = n as f64;
        if self.tokens >= n {
            self.tokens -= n;
            true
        } else {
            false
        }
    }

    /// The balance this bucket would hold at `now`, without mutating it.
    pub fn projected_tokens(&self, now: f64) -> f64 {
        // A clock that moved backward credits nothing.
        let elapsed = (now - self.last_refill).max(0.0);
        (self.tokens + elapsed * self.refill_rate).min(self.capacity as f64)
    }

    /// Seconds until at least one whole token is available, `0.0` if one is.
    pub fn time_to_next_token(&self) -> f64 {
        if self.tokens >= 1.0 {
            0.0
        } else {
            (1.0 - self.tokens) / self.refill_rate
        }
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the current (stored) token balance.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    /// Get the timestamp of the last refill.
    pub fn last_refill(&self) -> f64 {
        self.last_refill
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: f64 = 1_700_000_000.0;

    #[test]
    fn test_new_bucket_is_full() {
        let bucket = TokenBucket::new(10, 1.0, T0);
        assert_eq!(bucket.tokens(), 10.0);
        assert_eq!(bucket.capacity(), 10);
        assert_eq!(bucket.last_refill(), T0);
    }

    #[test]
    fn test_consume_exactly_capacity() {
        let mut bucket = TokenBucket::new(5, 1.0, T0);

        for _ in 0..5 {
            assert!(bucket.consume(1, T0));
        }

        // The 6th request should be rejected
        assert!(!bucket.consume(1, T0));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_refill_is_capped_at_capacity() {
        let mut bucket = TokenBucket::new(3, 2.0, T0);
        assert!(bucket.consume(1, T0));

        // An hour idle must not overflow the bucket.
        assert!(bucket.consume(1, T0 + 3600.0));
        assert_eq!(bucket.tokens(), 2.0);
    }

    #[test]
    fn test_denied_consume_advances_refill_clock() {
        let mut bucket = TokenBucket::new(1, 0.5, T0);
        assert!(bucket.consume(1, T0));

        assert!(!bucket.consume(1, T0 + 1.0));
        assert_eq!(bucket.last_refill(), T0 + 1.0);
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);

        assert!(bucket.consume(1, T0 + 2.0));
    }

    #[test]
    fn test_no_partial_consumption() {
        let mut bucket = TokenBucket::new(5, 1.0, T0);
        assert!(bucket.consume(4, T0));

        assert!(!bucket.consume(2, T0));
        assert_eq!(bucket.tokens(), 1.0);
    }

    #[test]
    fn test_clock_moving_backward_credits_nothing() {
        let mut bucket = TokenBucket::new(2, 1.0, T0);
        assert!(bucket.consume(2, T0));

        assert!(!bucket.consume(1, T0 - 30.0));
        assert_eq!(bucket.tokens(), 0.0);
        assert_eq!(bucket.last_refill(), T0);

        // Time lost going backward is not re-credited twice.
        assert!(bucket.consume(1, T0 + 1.0));
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_projected_tokens_does_not_mutate() {
        let mut bucket = TokenBucket::new(4, 1.0, T0);
        assert!(bucket.consume(4, T0));
        let before = bucket.clone();

        assert!((bucket.projected_tokens(T0 + 2.5) - 2.5).abs() < 1e-9);
        assert_eq!(bucket, before);
    }

    #[test]
    fn test_time_to_next_token() {
        let mut bucket = TokenBucket::new(2, 0.25, T0);
        assert_eq!(bucket.time_to_next_token(), 0.0);

        bucket.consume(2, T0);
        assert!((bucket.time_to_next_token() - 4.0).abs() < 1e-9);
    }
}
