// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token-bucket rate limiter with lazy refill.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::config::RateLimitConfig;
use crate::message::epoch_ms;

/// Minimum spacing between refills, regardless of contention.
const REFILL_PACING_MS: u64 = 100;

/// Shared token bucket. Token accounting is CAS-protected; refill runs under
/// a `try_lock` single writer with a double-check, so callers that lose the
/// race proceed without blocking.
pub struct RateLimiter {
    tokens: AtomicU64,
    last_refill_ms: AtomicU64,
    refill_lock: Mutex<()>,
    tokens_per_second: u64,
    capacity: u64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            tokens: AtomicU64::new(config.capacity),
            last_refill_ms: AtomicU64::new(epoch_ms()),
            refill_lock: Mutex::new(()),
            tokens_per_second: config.tokens_per_second,
            capacity: config.capacity,
        }
    }

    /// Try to take `n` tokens. Never blocks and never over-grants.
    pub fn try_acquire(&self, n: u64) -> bool {
        self.refill();

        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            if current < n {
                return false;
            }
            match self.tokens.compare_exchange_weak(
                current,
                current - n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Tokens currently available (snapshot; may be stale immediately).
    pub fn available(&self) -> u64 {
        self.tokens.load(Ordering::Acquire)
    }

    fn refill(&self) {
        let now = epoch_ms();
        let last = self.last_refill_ms.load(Ordering::Acquire);
        if now.saturating_sub(last) < REFILL_PACING_MS {
            return;
        }

        // Single writer; losers skip the refill rather than queueing up.
        let Ok(_guard) = self.refill_lock.try_lock() else {
            return;
        };

        // Double-check under the lock: another writer may have refilled
        // between the fast-path read and lock acquisition.
        let last = self.last_refill_ms.load(Ordering::Acquire);
        let elapsed = now.saturating_sub(last);
        if elapsed < REFILL_PACING_MS {
            return;
        }

        let minted = elapsed * self.tokens_per_second / 1_000;
        if minted == 0 {
            return;
        }

        let mut current = self.tokens.load(Ordering::Acquire);
        loop {
            let next = (current + minted).min(self.capacity);
            match self.tokens.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.last_refill_ms.store(now, Ordering::Release);
    }
}

#[cfg(test)]
#[path = "limiter_tests.rs"]
mod tests;
