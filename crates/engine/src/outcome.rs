// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-transition and per-message outcome records surfaced to callers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::message::{MessageState, ProcessingEvent};

// -- Transition results -------------------------------------------------------

/// Result of a single `fire` call on a state machine.
///
/// Every failure mode is folded into a variant of this record; `fire` never
/// returns an `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionResult {
    pub success: bool,
    pub from: MessageState,
    /// Successor state; `None` when the transition was rejected or errored.
    pub to: Option<MessageState>,
    pub event: ProcessingEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransitionResult {
    pub fn success(from: MessageState, to: MessageState, event: ProcessingEvent) -> Self {
        Self { success: true, from, to: Some(to), event, error: None }
    }

    /// Rejected by the transition table; the message is unchanged.
    pub fn invalid(from: MessageState, event: ProcessingEvent) -> Self {
        Self { success: false, from, to: None, event, error: None }
    }

    /// Pre-transition work failed; the message is unchanged.
    pub fn error(from: MessageState, event: ProcessingEvent, error: impl Into<String>) -> Self {
        Self { success: false, from, to: None, event, error: Some(error.into()) }
    }

    pub fn is_invalid(&self) -> bool {
        !self.success && self.error.is_none()
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

// -- Processing outcome -------------------------------------------------------

/// Caller-facing classification of where a message ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Duplicate,
    Failed,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record resolved by the submitter once a message reaches a resting
/// state (or the overall deadline expires).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub message_id: String,
    pub state: MessageState,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProcessingResult {
    /// Map a resting state to its outcome.
    pub fn from_state(message_id: impl Into<String>, state: MessageState) -> Self {
        let (outcome, detail) = match state {
            MessageState::Confirmed => (Outcome::Success, None),
            MessageState::Duplicate => (Outcome::Duplicate, None),
            MessageState::DeadLetter => (Outcome::Failed, Some("Message dead-lettered")),
            MessageState::Expired => (Outcome::Failed, Some("Message expired")),
            MessageState::Cancelled => (Outcome::Failed, Some("Message cancelled")),
            MessageState::Timeout => (Outcome::Failed, Some("Message timeout")),
            MessageState::Archived => (Outcome::Success, Some("Message archived")),
            _ => (Outcome::Error, Some("Unknown terminal state")),
        };
        Self {
            message_id: message_id.into(),
            state,
            outcome,
            detail: detail.map(str::to_owned),
        }
    }

    /// The overall submission deadline expired before a terminal state.
    pub fn timed_out(message_id: impl Into<String>, state: MessageState) -> Self {
        Self {
            message_id: message_id.into(),
            state,
            outcome: Outcome::Error,
            detail: Some("Processing timeout".to_owned()),
        }
    }

    pub fn error(
        message_id: impl Into<String>,
        state: MessageState,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            state,
            outcome: Outcome::Error,
            detail: Some(detail.into()),
        }
    }
}

/// Aggregated results for a batch submission, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    pub results: Vec<ProcessingResult>,
}

impl BatchResult {
    pub fn count_with(&self, outcome: Outcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }
}

// -- Processor stats ----------------------------------------------------------

/// Counters surfaced by [`Processor::stats`](crate::processor::Processor::stats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorStats {
    /// Registered messages not yet in a terminal state.
    pub active: usize,
    pub success: u64,
    pub failed: u64,
    pub duplicate: u64,
    /// `success / (success + failed)`; 1.0 when nothing has finished.
    pub success_rate: f64,
}

#[cfg(test)]
#[path = "outcome_tests.rs"]
mod tests;
