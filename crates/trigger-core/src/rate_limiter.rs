//! Token-bucket and sliding-window rate limiters, keyed per `(triggerId,
//! clientKey)` (spec §4.2).

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Key shard for per-trigger, per-client rate-limit state.
type LimiterKey = (Uuid, String);

/// Outcome of a `consume` / `check` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumeResult {
    pub allowed: bool,
    pub remaining: f64,
    pub reset_at: DateTime<Utc>,
    /// Only set when `allowed == false`.
    pub retry_after_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Token bucket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct TokenBucket {
    capacity: f64,
    refill_rate: f64, // tokens per ms
    burst_limit: f64,
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl TokenBucket {
    fn new(capacity: u32, window_ms: u64, burst_limit: Option<u32>, now: DateTime<Utc>) -> Self {
        let capacity = capacity as f64;
        let refill_rate = capacity / window_ms.max(1) as f64;
        Self {
            capacity,
            refill_rate,
            burst_limit: burst_limit.map(|b| b as f64).unwrap_or(capacity),
            tokens: capacity,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: DateTime<Utc>) {
        let elapsed_ms = (now - self.last_refill).num_milliseconds().max(0) as f64;
        self.tokens = (self.tokens + elapsed_ms * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    fn reset_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let needed = (self.capacity - self.tokens).max(0.0);
        let ms = (needed / self.refill_rate).ceil() as i64;
        now + chrono::Duration::milliseconds(ms)
    }

    fn at_full_capacity(&self) -> bool {
        self.tokens >= self.capacity
    }

    fn consume(&mut self, n: f64, now: DateTime<Utc>, mutate: bool) -> ConsumeResult {
        self.refill(now);

        if n > self.burst_limit {
            let retry_after_ms = ((n - self.tokens).max(0.0) / self.refill_rate).ceil() as u64;
            return ConsumeResult {
                allowed: false,
                remaining: self.tokens,
                reset_at: self.reset_at(now),
                retry_after_ms: Some(retry_after_ms),
            };
        }

        if self.tokens >= n {
            if mutate {
                self.tokens -= n;
            }
            ConsumeResult {
                allowed: true,
                remaining: self.tokens,
                reset_at: self.reset_at(now),
                retry_after_ms: None,
            }
        } else {
            let retry_after_ms = ((n - self.tokens) / self.refill_rate).ceil().max(0.0) as u64;
            ConsumeResult {
                allowed: false,
                remaining: self.tokens,
                reset_at: self.reset_at(now),
                retry_after_ms: Some(retry_after_ms),
            }
        }
    }
}

/// Token-bucket limiter, `capacity`/`window` configured per trigger at
/// registration time, state created lazily on first `consume`.
#[derive(Debug, Default)]
pub struct TokenBucketLimiter {
    buckets: DashMap<LimiterKey, TokenBucket>,
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    fn get_or_init(
        &self,
        trigger_id: Uuid,
        client_key: &str,
        capacity: u32,
        window_ms: u64,
        burst_limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> dashmap::mapref::one::RefMut<'_, LimiterKey, TokenBucket> {
        self.buckets
            .entry((trigger_id, client_key.to_string()))
            .or_insert_with(|| TokenBucket::new(capacity, window_ms, burst_limit, now))
    }

    /// Deduct `n` tokens if available.
    pub fn consume(
        &self,
        trigger_id: Uuid,
        client_key: &str,
        n: u32,
        capacity: u32,
        window_ms: u64,
        burst_limit: Option<u32>,
    ) -> ConsumeResult {
        let now = Utc::now();
        let mut bucket =
            self.get_or_init(trigger_id, client_key, capacity, window_ms, burst_limit, now);
        bucket.consume(n as f64, now, true)
    }

    /// Non-mutating variant of `consume`.
    pub fn check(
        &self,
        trigger_id: Uuid,
        client_key: &str,
        n: u32,
        capacity: u32,
        window_ms: u64,
        burst_limit: Option<u32>,
    ) -> ConsumeResult {
        let now = Utc::now();
        let mut bucket =
            self.get_or_init(trigger_id, client_key, capacity, window_ms, burst_limit, now);
        bucket.consume(n as f64, now, false)
    }

    /// Remove every bucket whose trigger was unregistered.
    pub fn remove_trigger(&self, trigger_id: Uuid) {
        self.buckets.retain(|(id, _), _| *id != trigger_id);
    }

    /// Drop buckets that have refilled back to full capacity. Intended to be
    /// invoked from a periodic sweep task (every 60s, per spec §4.2).
    pub fn sweep(&self) {
        let now = Utc::now();
        self.buckets.retain(|_, bucket| {
            bucket.refill(now);
            !bucket.at_full_capacity()
        });
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Sliding window
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SlidingWindowLimiter {
    windows: DashMap<LimiterKey, VecDeque<DateTime<Utc>>>,
}

impl SlidingWindowLimiter {
    pub fn new() -> Self {
        Self {
            windows: DashMap::new(),
        }
    }

    pub fn consume(
        &self,
        trigger_id: Uuid,
        client_key: &str,
        max_requests: u32,
        window_ms: u64,
    ) -> ConsumeResult {
        let now = Utc::now();
        let cutoff = now - chrono::Duration::milliseconds(window_ms as i64);

        let mut entry = self
            .windows
            .entry((trigger_id, client_key.to_string()))
            .or_default();
        while matches!(entry.front(), Some(ts) if *ts <= cutoff) {
            entry.pop_front();
        }

        if entry.len() as u32 >= max_requests {
            let reset_at = entry
                .front()
                .copied()
                .unwrap_or(now)
                + chrono::Duration::milliseconds(window_ms as i64);
            return ConsumeResult {
                allowed: false,
                remaining: 0.0,
                reset_at,
                retry_after_ms: Some((reset_at - now).num_milliseconds().max(0) as u64),
            };
        }

        entry.push_back(now);
        let remaining = (max_requests as usize - entry.len()) as f64;
        ConsumeResult {
            allowed: true,
            remaining,
            reset_at: now + chrono::Duration::milliseconds(window_ms as i64),
            retry_after_ms: None,
        }
    }

    pub fn remove_trigger(&self, trigger_id: Uuid) {
        self.windows.retain(|(id, _), _| *id != trigger_id);
    }

    /// Drop windows that have fully drained past the window edge.
    pub fn sweep(&self, window_ms: u64) {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(window_ms as i64);
        self.windows.retain(|_, timestamps| {
            while matches!(timestamps.front(), Some(ts) if *ts <= cutoff) {
                timestamps.pop_front();
            }
            !timestamps.is_empty()
        });
    }
}

/// Unified limiter facade dispatched on `RateLimitDiscipline`, shared by the
/// webhook dispatcher.
#[derive(Debug, Default)]
pub struct RateLimiter {
    pub token_bucket: Arc<TokenBucketLimiter>,
    pub sliding_window: Arc<SlidingWindowLimiter>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            token_bucket: Arc::new(TokenBucketLimiter::new()),
            sliding_window: Arc::new(SlidingWindowLimiter::new()),
        }
    }

    pub fn remove_trigger(&self, trigger_id: Uuid) {
        self.token_bucket.remove_trigger(trigger_id);
        self.sliding_window.remove_trigger(trigger_id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
