// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine configuration: immutable at construction, deserializable from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::message::MessageState;

/// Top-level configuration for a [`Processor`](crate::processor::Processor).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub ordering: OrderingConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pacing delay before the scheduler auto-advances an interior state.
    #[serde(default = "default_advance_interval_ms")]
    pub advance_interval_ms: u64,

    /// Interval at which the submitter polls a message's state.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Overall deadline for a submission to reach a terminal state.
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup: DedupConfig::default(),
            rate_limit: RateLimitConfig::default(),
            ordering: OrderingConfig::default(),
            timeout: TimeoutConfig::default(),
            retry: RetryConfig::default(),
            advance_interval_ms: default_advance_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            submit_timeout_ms: default_submit_timeout_ms(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; absent fields take their defaults.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn advance_interval(&self) -> Duration {
        Duration::from_millis(self.advance_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }
}

fn default_advance_interval_ms() -> u64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_submit_timeout_ms() -> u64 {
    30_000
}

// -- Deduplication ------------------------------------------------------------

/// Sliding-window deduplication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Window within which an identical fingerprint counts as a duplicate.
    #[serde(default = "default_dedup_window_ms")]
    pub window_ms: u64,
    /// Hard cap on cached fingerprints.
    #[serde(default = "default_dedup_max_cache_size")]
    pub max_cache_size: usize,
    /// Digest over the canonical byte form ("SHA-256" or "SHA-512"; anything
    /// else falls back to a non-cryptographic hash with a logged warning).
    #[serde(default = "default_digest_algorithm")]
    pub digest_algorithm: String,
    /// Cadence of the background eviction task.
    #[serde(default = "default_dedup_eviction_interval_ms")]
    pub eviction_interval_ms: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_ms: default_dedup_window_ms(),
            max_cache_size: default_dedup_max_cache_size(),
            digest_algorithm: default_digest_algorithm(),
            eviction_interval_ms: default_dedup_eviction_interval_ms(),
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }
}

fn default_dedup_window_ms() -> u64 {
    300_000
}

fn default_dedup_max_cache_size() -> usize {
    100_000
}

fn default_digest_algorithm() -> String {
    "SHA-256".to_owned()
}

fn default_dedup_eviction_interval_ms() -> u64 {
    60_000
}

// -- Rate limiting ------------------------------------------------------------

/// Token-bucket settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_tokens_per_second")]
    pub tokens_per_second: u64,
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    /// Cadence of the recovery tick for messages parked in `rate_limited`.
    #[serde(default = "default_recovery_check_interval_ms")]
    pub recovery_check_interval_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: default_tokens_per_second(),
            capacity: default_capacity(),
            recovery_check_interval_ms: default_recovery_check_interval_ms(),
        }
    }
}

impl RateLimitConfig {
    pub fn recovery_check_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_check_interval_ms)
    }
}

fn default_tokens_per_second() -> u64 {
    100
}

fn default_capacity() -> u64 {
    200
}

fn default_recovery_check_interval_ms() -> u64 {
    100
}

// -- Ordering -----------------------------------------------------------------

/// Policy for a message whose sequence is below the partition's expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateSequencePolicy {
    /// Route the message through the failure path (retry, then dead-letter).
    Fail,
    /// Park the message anyway and rely on the ordering-wait timeout.
    Park,
}

/// Per-partition ordered-release settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fallback partition key when a message has neither a partition tag nor
    /// a topic.
    #[serde(default = "default_ordering_key")]
    pub ordering_key: String,
    /// Age bound for parked entries; older entries are pruned during scans.
    #[serde(default = "default_ordering_max_wait_ms")]
    pub max_wait_ms: u64,
    /// Bound on a partition's waiting queue; overflow evicts the oldest.
    #[serde(default = "default_max_pending_messages")]
    pub max_pending_messages: usize,
    #[serde(default = "default_late_policy")]
    pub late_policy: LateSequencePolicy,
}

impl Default for OrderingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ordering_key: default_ordering_key(),
            max_wait_ms: default_ordering_max_wait_ms(),
            max_pending_messages: default_max_pending_messages(),
            late_policy: default_late_policy(),
        }
    }
}

fn default_ordering_key() -> String {
    "default".to_owned()
}

fn default_ordering_max_wait_ms() -> u64 {
    5_000
}

fn default_max_pending_messages() -> usize {
    1_000
}

fn default_late_policy() -> LateSequencePolicy {
    LateSequencePolicy::Fail
}

// -- Per-state timeouts -------------------------------------------------------

/// Deadlines for the states in the timeout set. A state not covered here
/// never times out on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_dedup_checking_ms")]
    pub dedup_checking_ms: u64,
    #[serde(default = "default_timeout_rate_limiting_ms")]
    pub rate_limiting_ms: u64,
    #[serde(default = "default_timeout_preprocessing_ms")]
    pub preprocessing_ms: u64,
    #[serde(default = "default_timeout_sending_ms")]
    pub sending_ms: u64,
    #[serde(default = "default_timeout_sent_ms")]
    pub sent_ms: u64,
    #[serde(default = "default_timeout_ordering_wait_ms")]
    pub ordering_wait_ms: u64,
    /// Applied to timeout-set members without a named entry
    /// (currently `partial_confirmed`).
    #[serde(default = "default_timeout_fallback_ms")]
    pub fallback_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            dedup_checking_ms: default_timeout_dedup_checking_ms(),
            rate_limiting_ms: default_timeout_rate_limiting_ms(),
            preprocessing_ms: default_timeout_preprocessing_ms(),
            sending_ms: default_timeout_sending_ms(),
            sent_ms: default_timeout_sent_ms(),
            ordering_wait_ms: default_timeout_ordering_wait_ms(),
            fallback_ms: default_timeout_fallback_ms(),
        }
    }
}

impl TimeoutConfig {
    /// Deadline for a state, or `None` when the state has no timeout.
    pub fn for_state(&self, state: MessageState) -> Option<Duration> {
        let ms = match state {
            MessageState::DedupChecking => self.dedup_checking_ms,
            MessageState::RateLimiting => self.rate_limiting_ms,
            MessageState::Preprocessing => self.preprocessing_ms,
            MessageState::Sending => self.sending_ms,
            MessageState::Sent => self.sent_ms,
            MessageState::OrderingWait => self.ordering_wait_ms,
            MessageState::PartialConfirmed => self.fallback_ms,
            _ => return None,
        };
        Some(Duration::from_millis(ms))
    }
}

fn default_timeout_dedup_checking_ms() -> u64 {
    5_000
}

fn default_timeout_rate_limiting_ms() -> u64 {
    3_000
}

fn default_timeout_preprocessing_ms() -> u64 {
    10_000
}

fn default_timeout_sending_ms() -> u64 {
    30_000
}

fn default_timeout_sent_ms() -> u64 {
    60_000
}

fn default_timeout_ordering_wait_ms() -> u64 {
    15_000
}

fn default_timeout_fallback_ms() -> u64 {
    30_000
}

// -- Retry --------------------------------------------------------------------

/// Exponential-backoff retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_retry_max_delay_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry attempt `retry_count`:
    /// `base · multiplier^retry_count`, capped at `max_delay_ms`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let scaled = self.base_delay_ms as f64 * self.backoff_multiplier.powi(retry_count as i32);
        let capped = scaled.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
