//! Caller identification from request metadata.

use std::net::IpAddr;

/// Standard proxy chain header; the left-most entry is the original client.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
/// Single-address header set by nginx-style proxies.
pub const X_REAL_IP: &str = "x-real-ip";
/// Forwarding chain set by the Vercel edge network.
pub const X_VERCEL_FORWARDED_FOR: &str = "x-vercel-forwarded-for";

/// Identifier used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Request headers with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestHeaders {
    /// Lowercased name and raw value, in arrival order
    entries: Vec<(String, String)>,
}

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header. Repeated names are kept; lookups see the first.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .push((name.as_ref().to_ascii_lowercase(), value.into()));
    }

    /// First value of the header `name`, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: AsRef<str>, V: Into<String>> FromIterator<(N, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut headers = RequestHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Derive the rate limiting identifier for a request.
///
/// Precedence: the first `X-Forwarded-For` hop, `X-Real-IP`, the first
/// `X-Vercel-Forwarded-For` hop, the peer address, then [`UNKNOWN_CLIENT`].
/// Blank header values are skipped.
pub fn client_identifier(headers: &RequestHeaders, peer: Option<IpAddr>) -> String {
    let candidates = [
        headers.get(X_FORWARDED_FOR).and_then(first_hop),
        headers.get(X_REAL_IP).map(str::trim),
        headers.get(X_VERCEL_FORWARDED_FOR).and_then(first_hop),
    ];

    candidates
        .into_iter()
        .flatten()
        .find(|candidate| !candidate.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.to_string()))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn first_hop(chain: &str) -> Option<&str> {
    chain.split(',').next().map(str::trim)
}
