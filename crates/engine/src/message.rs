// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message record, lifecycle states, and the events that drive them.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Tag key carrying the partition key for ordered delivery.
pub const TAG_PARTITION_KEY: &str = "partitionKey";
/// Tag key carrying the sequence number within a partition.
pub const TAG_SEQUENCE: &str = "sequence";

/// Default time-to-live for messages built without an explicit expiry.
const DEFAULT_TTL_MS: u64 = 86_400_000;

/// Return current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// -- Message ------------------------------------------------------------------

/// A single unit of work flowing through the pipeline.
///
/// The identifier is immutable after construction; the state field is the
/// single source of truth for the message's position in the pipeline and is
/// only written by its owning state machine.
#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    pub topic: String,
    pub payload: Bytes,
    pub body: String,
    pub created_at: u64,
    pub expires_at: u64,
    pub priority: u8,
    retry_count: u32,
    max_retries: Option<u32>,
    state: MessageState,
    pub tags: HashMap<String, String>,
}

impl Message {
    /// Build a new message with a generated v4 id and defaults.
    pub fn new(topic: impl Into<String>, body: impl Into<String>) -> Self {
        let now = epoch_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.into(),
            payload: Bytes::new(),
            body: body.into(),
            created_at: now,
            expires_at: now + DEFAULT_TTL_MS,
            priority: 0,
            retry_count: 0,
            max_retries: None,
            state: MessageState::Init,
            tags: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the expiry as an offset from the creation timestamp.
    pub fn with_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.expires_at = self.created_at + ttl_ms;
        self
    }

    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = Some(max);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_partition_key(self, key: impl Into<String>) -> Self {
        self.with_tag(TAG_PARTITION_KEY, key)
    }

    pub fn with_sequence(self, sequence: u64) -> Self {
        self.with_tag(TAG_SEQUENCE, sequence.to_string())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> MessageState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: MessageState) {
        self.state = state;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub(crate) fn increment_retry(&mut self) {
        self.retry_count += 1;
    }

    /// Resolved retry bound: the builder override, else the engine default
    /// installed at registration.
    pub fn max_retries(&self) -> u32 {
        self.max_retries.unwrap_or(3)
    }

    /// Install the engine-level retry bound unless the builder set one.
    pub(crate) fn apply_default_max_retries(&mut self, max: u32) {
        if self.max_retries.is_none() {
            self.max_retries = Some(max);
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries()
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Sequence number within the partition: the `sequence` tag if it parses,
    /// else the creation timestamp.
    pub fn sequence(&self) -> u64 {
        self.tag(TAG_SEQUENCE).and_then(|s| s.parse().ok()).unwrap_or(self.created_at)
    }
}

// -- States -------------------------------------------------------------------

/// Position of a message in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Init,
    DedupChecking,
    Duplicate,
    RateLimiting,
    RateLimited,
    Queued,
    OrderingWait,
    Preprocessing,
    Sending,
    SendPaused,
    Sent,
    PartialConfirmed,
    Confirmed,
    Failed,
    RetryPreparing,
    RetryDelayed,
    Retrying,
    Timeout,
    DeadLetter,
    Expired,
    Cancelled,
    Archiving,
    Archived,
}

/// All states, for exhaustive sweeps in tests and tooling.
pub const ALL_STATES: [MessageState; 23] = [
    MessageState::Init,
    MessageState::DedupChecking,
    MessageState::Duplicate,
    MessageState::RateLimiting,
    MessageState::RateLimited,
    MessageState::Queued,
    MessageState::OrderingWait,
    MessageState::Preprocessing,
    MessageState::Sending,
    MessageState::SendPaused,
    MessageState::Sent,
    MessageState::PartialConfirmed,
    MessageState::Confirmed,
    MessageState::Failed,
    MessageState::RetryPreparing,
    MessageState::RetryDelayed,
    MessageState::Retrying,
    MessageState::Timeout,
    MessageState::DeadLetter,
    MessageState::Expired,
    MessageState::Cancelled,
    MessageState::Archiving,
    MessageState::Archived,
];

impl MessageState {
    /// Wire-format string for this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::DedupChecking => "dedup_checking",
            Self::Duplicate => "duplicate",
            Self::RateLimiting => "rate_limiting",
            Self::RateLimited => "rate_limited",
            Self::Queued => "queued",
            Self::OrderingWait => "ordering_wait",
            Self::Preprocessing => "preprocessing",
            Self::Sending => "sending",
            Self::SendPaused => "send_paused",
            Self::Sent => "sent",
            Self::PartialConfirmed => "partial_confirmed",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::RetryPreparing => "retry_preparing",
            Self::RetryDelayed => "retry_delayed",
            Self::Retrying => "retrying",
            Self::Timeout => "timeout",
            Self::DeadLetter => "dead_letter",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
            Self::Archiving => "archiving",
            Self::Archived => "archived",
        }
    }

    /// Terminal states admit no progression except archival (and RESET from
    /// the dead-letter state).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed
                | Self::Duplicate
                | Self::DeadLetter
                | Self::Expired
                | Self::Cancelled
                | Self::Archived
        )
    }

    /// Parked states wait for a scheduled or external stimulus to progress.
    pub fn is_parked(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::OrderingWait | Self::RetryDelayed | Self::SendPaused
        )
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Events -------------------------------------------------------------------

/// A discrete stimulus that may advance a message's state.
///
/// The three `Check*` events are drivers: the state machine resolves them
/// against the admission collaborators and substitutes the effective event
/// before consulting the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingEvent {
    StartProcessing,
    CheckDedup,
    DedupPass,
    DedupDuplicate,
    CheckRateLimit,
    RateLimitPass,
    RateLimitExceeded,
    RateLimitRecovered,
    CheckOrder,
    OrderReady,
    Preprocess,
    PreprocessComplete,
    Sent,
    Confirm,
    PartialConfirm,
    Fail,
    Timeout,
    Cancel,
    Expire,
    PauseSend,
    ResumeSend,
    PrepareRetry,
    Retry,
    DelayRetry,
    RetryResume,
    MaxRetriesExceeded,
    Archive,
    ArchiveComplete,
    Reset,
}

/// All events, for exhaustive sweeps in tests and tooling.
pub const ALL_EVENTS: [ProcessingEvent; 29] = [
    ProcessingEvent::StartProcessing,
    ProcessingEvent::CheckDedup,
    ProcessingEvent::DedupPass,
    ProcessingEvent::DedupDuplicate,
    ProcessingEvent::CheckRateLimit,
    ProcessingEvent::RateLimitPass,
    ProcessingEvent::RateLimitExceeded,
    ProcessingEvent::RateLimitRecovered,
    ProcessingEvent::CheckOrder,
    ProcessingEvent::OrderReady,
    ProcessingEvent::Preprocess,
    ProcessingEvent::PreprocessComplete,
    ProcessingEvent::Sent,
    ProcessingEvent::Confirm,
    ProcessingEvent::PartialConfirm,
    ProcessingEvent::Fail,
    ProcessingEvent::Timeout,
    ProcessingEvent::Cancel,
    ProcessingEvent::Expire,
    ProcessingEvent::PauseSend,
    ProcessingEvent::ResumeSend,
    ProcessingEvent::PrepareRetry,
    ProcessingEvent::Retry,
    ProcessingEvent::DelayRetry,
    ProcessingEvent::RetryResume,
    ProcessingEvent::MaxRetriesExceeded,
    ProcessingEvent::Archive,
    ProcessingEvent::ArchiveComplete,
    ProcessingEvent::Reset,
];

impl ProcessingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartProcessing => "start_processing",
            Self::CheckDedup => "check_dedup",
            Self::DedupPass => "dedup_pass",
            Self::DedupDuplicate => "dedup_duplicate",
            Self::CheckRateLimit => "check_rate_limit",
            Self::RateLimitPass => "rate_limit_pass",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::RateLimitRecovered => "rate_limit_recovered",
            Self::CheckOrder => "check_order",
            Self::OrderReady => "order_ready",
            Self::Preprocess => "preprocess",
            Self::PreprocessComplete => "preprocess_complete",
            Self::Sent => "sent",
            Self::Confirm => "confirm",
            Self::PartialConfirm => "partial_confirm",
            Self::Fail => "fail",
            Self::Timeout => "timeout",
            Self::Cancel => "cancel",
            Self::Expire => "expire",
            Self::PauseSend => "pause_send",
            Self::ResumeSend => "resume_send",
            Self::PrepareRetry => "prepare_retry",
            Self::Retry => "retry",
            Self::DelayRetry => "delay_retry",
            Self::RetryResume => "retry_resume",
            Self::MaxRetriesExceeded => "max_retries_exceeded",
            Self::Archive => "archive",
            Self::ArchiveComplete => "archive_complete",
            Self::Reset => "reset",
        }
    }

    /// Driver events are resolved by the machine's pre-transition work.
    pub fn is_driver(&self) -> bool {
        matches!(self, Self::CheckDedup | Self::CheckRateLimit | Self::CheckOrder)
    }
}

impl fmt::Display for ProcessingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
