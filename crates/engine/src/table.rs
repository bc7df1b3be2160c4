// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Static transition table: which events are legal in which states, and the
//! successor they produce.
//!
//! The table is pure data — guards read the message but never mutate it. The
//! single guarded mutation (retry-count increment on an admitted
//! `prepare_retry`) happens at commit time in the state machine.

use crate::message::{Message, MessageState, ProcessingEvent};

/// Whether `event` may be fired at all while in `state`.
///
/// Driver events (`check_dedup`, `check_rate_limit`) are legal in their
/// admission states even though they never appear as effective events; the
/// machine resolves them to a pass/reject event before computing a successor.
pub fn accepts(state: MessageState, event: ProcessingEvent) -> bool {
    use MessageState as S;
    use ProcessingEvent as E;

    match (state, event) {
        (S::DedupChecking, E::CheckDedup) | (S::RateLimiting, E::CheckRateLimit) => true,
        _ => successor(state, event, true).is_some(),
    }
}

/// Compute the successor state for an effective event, applying guards
/// against the message. `None` means the pair is rejected.
pub fn next_state(
    state: MessageState,
    event: ProcessingEvent,
    message: &Message,
) -> Option<MessageState> {
    successor(state, event, message.can_retry())
}

fn successor(
    state: MessageState,
    event: ProcessingEvent,
    can_retry: bool,
) -> Option<MessageState> {
    use MessageState as S;
    use ProcessingEvent as E;

    Some(match (state, event) {
        // Admission pipeline
        (S::Init, E::StartProcessing) => S::DedupChecking,
        (S::DedupChecking, E::DedupPass) => S::RateLimiting,
        (S::DedupChecking, E::DedupDuplicate) => S::Duplicate,
        (S::RateLimiting, E::RateLimitPass) => S::Queued,
        (S::RateLimiting, E::RateLimitExceeded) => S::RateLimited,
        (S::RateLimited, E::RateLimitRecovered) => S::Queued,
        (S::Queued, E::CheckOrder) => S::OrderingWait,
        (S::Queued, E::Preprocess) => S::Preprocessing,
        (S::OrderingWait, E::OrderReady) => S::Preprocessing,
        (S::Preprocessing, E::PreprocessComplete) => S::Sending,

        // Transport
        (S::Sending, E::Sent) => S::Sent,
        (S::Sending, E::PauseSend) => S::SendPaused,
        (S::SendPaused, E::ResumeSend) => S::Sending,
        (S::Sent, E::Confirm) => S::Confirmed,
        (S::Sent, E::PartialConfirm) => S::PartialConfirmed,
        (S::PartialConfirmed, E::Confirm) => S::Confirmed,

        // Failure entry
        (
            S::Queued | S::Preprocessing | S::Sending | S::Sent | S::PartialConfirmed
            | S::Retrying,
            E::Fail,
        ) => S::Failed,
        (
            S::DedupChecking | S::RateLimiting | S::RateLimited | S::OrderingWait
            | S::Preprocessing | S::Sending | S::Sent | S::PartialConfirmed,
            E::Timeout,
        ) => S::Timeout,

        // Retry flow; exhausted retries redirect to the dead-letter state.
        (S::Failed | S::Timeout, E::PrepareRetry) => {
            if can_retry {
                S::RetryPreparing
            } else {
                S::DeadLetter
            }
        }
        (S::RetryPreparing, E::Retry) => S::Retrying,
        (S::RetryPreparing, E::DelayRetry) => S::RetryDelayed,
        (S::RetryDelayed, E::RetryResume) => S::Retrying,
        (S::Retrying, E::Sent) => S::Sent,
        (
            S::Failed | S::Timeout | S::RetryPreparing | S::RetryDelayed,
            E::MaxRetriesExceeded,
        ) => S::DeadLetter,

        // Lifecycle control: cancel from any non-terminal state except a
        // started archival, expire while admission or retry work is pending.
        (
            S::Init | S::DedupChecking | S::RateLimiting | S::RateLimited | S::Queued
            | S::OrderingWait | S::Preprocessing | S::Sending | S::SendPaused | S::Sent
            | S::PartialConfirmed | S::Failed | S::RetryPreparing | S::RetryDelayed
            | S::Retrying | S::Timeout,
            E::Cancel,
        ) => S::Cancelled,
        (
            S::Init | S::DedupChecking | S::RateLimiting | S::RateLimited | S::Queued
            | S::OrderingWait | S::Preprocessing | S::SendPaused | S::Failed
            | S::RetryPreparing | S::RetryDelayed | S::Timeout,
            E::Expire,
        ) => S::Expired,

        // Archival; the dead-letter state may also be reset for another run.
        (
            S::Confirmed | S::Duplicate | S::DeadLetter | S::Expired | S::Cancelled,
            E::Archive,
        ) => S::Archiving,
        (S::Archiving, E::ArchiveComplete) => S::Archived,
        (S::DeadLetter, E::Reset) => S::Init,

        _ => return None,
    })
}

#[cfg(test)]
#[path = "table_tests.rs"]
mod tests;
