//! Request rate limiting
//!
//! Two token-bucket families: one keyed by the identity of the sending
//! node, one keyed by client IPv4 address. Buckets refill lazily on
//! access; an empty bucket means the caller answers 429. The service
//! publishes IPv4 only, so IPv6 clients are refused outright.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use swarmnode_crypto::LegacyPubkey;

/// Burst capacity for a fellow node
pub const SNODE_BUCKET_SIZE: f64 = 600.0;
/// Refill rate for a fellow node, tokens per second
pub const SNODE_TOKEN_RATE: f64 = 300.0;

/// Burst capacity for a client address
pub const CLIENT_BUCKET_SIZE: f64 = 20.0;
/// Refill rate for a client address, tokens per second
pub const CLIENT_TOKEN_RATE: f64 = 5.0;

/// Bound on tracked entries per family; full buckets are pruned first
const MAX_ENTRIES: usize = 10_000;

/// A classic token bucket: allows bursts up to capacity while holding
/// the long-term rate at `rate` tokens per second
struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, rate: f64) -> Self {
        Self {
            tokens: capacity,
            capacity,
            rate,
            last_refill: Instant::now(),
        }
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    fn is_full(&mut self) -> bool {
        self.refill();
        self.tokens >= self.capacity
    }
}

/// Per-source request rate limiter
pub struct RateLimiter {
    snode_buckets: Mutex<HashMap<LegacyPubkey, TokenBucket>>,
    client_buckets: Mutex<HashMap<Ipv4Addr, TokenBucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            snode_buckets: Mutex::new(HashMap::new()),
            client_buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a request from the node identified by `pk` must be
    /// rejected with 429
    pub fn should_rate_limit(&self, pk: &LegacyPubkey) -> bool {
        let mut buckets = self.snode_buckets.lock();
        if buckets.len() >= MAX_ENTRIES && !buckets.contains_key(pk) {
            prune(&mut buckets);
        }
        let bucket = buckets
            .entry(*pk)
            .or_insert_with(|| TokenBucket::new(SNODE_BUCKET_SIZE, SNODE_TOKEN_RATE));
        let limited = !bucket.try_consume();
        if limited {
            debug!(node = %pk, "rate limiting node request");
        }
        limited
    }

    /// Whether a request from a client address must be rejected.
    /// IPv6 clients are always rejected.
    pub fn should_rate_limit_client(&self, addr: IpAddr) -> bool {
        let IpAddr::V4(addr) = addr else {
            debug!(%addr, "rejecting non-IPv4 client");
            return true;
        };

        let mut buckets = self.client_buckets.lock();
        if buckets.len() >= MAX_ENTRIES && !buckets.contains_key(&addr) {
            prune(&mut buckets);
        }
        let bucket = buckets
            .entry(addr)
            .or_insert_with(|| TokenBucket::new(CLIENT_BUCKET_SIZE, CLIENT_TOKEN_RATE));
        let limited = !bucket.try_consume();
        if limited {
            debug!(client = %addr, "rate limiting client request");
        }
        limited
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop every bucket that has refilled to capacity; an idle source
/// carries no state worth keeping
fn prune<K: Eq + std::hash::Hash>(buckets: &mut HashMap<K, TokenBucket>) {
    buckets.retain(|_, bucket| !bucket.is_full());
}
