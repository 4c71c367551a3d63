use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// A single admission gate. Implementations are internally thread-safe and
/// never suspend; `allow` is called on the request hot path.
pub trait RateLimiter: Send + Sync {
    fn allow(&self) -> bool;

    /// Remaining tokens, for limiters that have a meaningful notion of them.
    fn tokens(&self) -> Option<i64> {
        None
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: i64,
    last_refill: Instant,
}

/// Token bucket: capacity `C`, refill rate `r` tokens per second.
///
/// Refill credits whole elapsed seconds only; the remainder stays on the
/// clock until the next call observes a full second.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: i64,
    refill_rate: i64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: i64, refill_rate: i64) -> Self {
        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }
}

impl RateLimiter for TokenBucket {
    fn allow(&self) -> bool {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        let to_add = elapsed.as_secs() as i64 * self.refill_rate;

        state.tokens = (state.tokens + to_add).min(self.capacity);
        state.last_refill = now;

        if state.tokens >= 1 {
            state.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn tokens(&self) -> Option<i64> {
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        Some(state.tokens)
    }
}

/// Sliding window: at most `limit` requests inside the trailing `window`.
#[derive(Debug)]
pub struct SlidingWindow {
    limit: usize,
    window: Duration,
    requests: Mutex<Vec<Instant>>,
}

impl SlidingWindow {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests currently inside the window.
    pub fn current_rate(&self) -> usize {
        let requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cutoff = Instant::now() - self.window;
        requests.iter().filter(|t| **t > cutoff).count()
    }
}

impl RateLimiter for SlidingWindow {
    fn allow(&self) -> bool {
        let mut requests = match self.requests.lock() {
            Ok(requests) => requests,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let cutoff = now - self.window;
        requests.retain(|t| *t > cutoff);

        if requests.len() >= self.limit {
            return false;
        }

        requests.push(now);
        true
    }
}
