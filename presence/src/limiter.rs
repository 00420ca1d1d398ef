//! Per-(meeting, participant) challenge limiter using the token bucket
//! algorithm.
//!
//! Each bucket starts full. Tokens are refilled lazily on access, one per
//! elapsed refill interval, capped at capacity. Partial intervals carry
//! over to the next access.

use std::collections::HashMap;

use troof_types::{MeetingId, ParticipantId, Timestamp};

/// A single token bucket driven by an external clock.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBucket {
    capacity: u32,
    refill_ms: u64,
    tokens: u32,
    /// Start of the interval currently accruing.
    last_refill: Timestamp,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_ms: u64, now: Timestamp) -> Self {
        Self {
            capacity,
            refill_ms,
            tokens: capacity,
            last_refill: now,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Timestamp) -> bool {
        self.refill(now);
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self, now: Timestamp) {
        if self.tokens >= self.capacity || self.refill_ms == 0 {
            self.tokens = self.capacity;
            self.last_refill = now;
            return;
        }
        let intervals = self.last_refill.elapsed_since(now) / self.refill_ms;
        if intervals == 0 {
            return;
        }
        let refilled = u64::from(self.tokens).saturating_add(intervals);
        if refilled >= u64::from(self.capacity) {
            self.tokens = self.capacity;
            self.last_refill = now;
        } else {
            self.tokens = refilled as u32;
            self.last_refill = self.last_refill.plus(intervals * self.refill_ms);
        }
    }

    /// Whether the bucket would be full at `now`.
    pub fn is_full(&self, now: Timestamp) -> bool {
        let mut projected = self.clone();
        projected.refill(now);
        projected.tokens >= projected.capacity
    }

    /// Current available tokens. Useful for diagnostics.
    pub fn available_tokens(&self) -> u32 {
        self.tokens
    }
}

pub struct RateLimiter {
    buckets: HashMap<(MeetingId, ParticipantId), TokenBucket>,
    capacity: u32,
    refill_ms: u64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_ms: u64) -> Self {
        Self {
            buckets: HashMap::new(),
            capacity,
            refill_ms,
        }
    }

    /// Take one token from the (meeting, participant) bucket.
    pub fn try_acquire(
        &mut self,
        meeting: &MeetingId,
        participant: &ParticipantId,
        now: Timestamp,
    ) -> bool {
        let (capacity, refill_ms) = (self.capacity, self.refill_ms);
        self.buckets
            .entry((meeting.clone(), participant.clone()))
            .or_insert_with(|| TokenBucket::new(capacity, refill_ms, now))
            .try_acquire(now)
    }

    /// Drop buckets that have refilled to capacity; a fresh bucket is
    /// equivalent. Returns the number dropped.
    pub fn prune(&mut self, now: Timestamp) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_full(now));
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
