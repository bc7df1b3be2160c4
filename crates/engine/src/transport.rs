// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport seam between the state machine and the wire layer.
//!
//! The engine drives SENDING and SENT through this trait; the bundled
//! simulated implementation stands in for a broker so the pipeline runs
//! standalone and in tests.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::message::Message;

/// Tag that makes the simulated transport fail every send attempt.
pub const TAG_SIMULATE_FAILURE: &str = "simulateFailure";

/// Result of handing a message to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
    Accepted,
    Failed { reason: String },
}

/// Result of awaiting the receiver's confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmStatus {
    Confirmed,
    Partial,
    Failed { reason: String },
}

/// Object-safe delivery backend.
pub trait Transport: Send + Sync + 'static {
    fn send<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = SendStatus> + Send + 'a>>;

    fn confirm<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = ConfirmStatus> + Send + 'a>>;
}

/// Reference transport: paced, always succeeds unless the message carries
/// the failure-injection tag.
pub struct SimulatedTransport {
    pacing: Duration,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self { pacing: Duration::from_millis(100) }
    }

    pub fn with_pacing(pacing: Duration) -> Self {
        Self { pacing }
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimulatedTransport {
    fn send<'a>(
        &'a self,
        message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = SendStatus> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.pacing).await;
            if message.tag(TAG_SIMULATE_FAILURE) == Some("true") {
                SendStatus::Failed { reason: "simulated send failure".to_owned() }
            } else {
                SendStatus::Accepted
            }
        })
    }

    fn confirm<'a>(
        &'a self,
        _message: &'a Message,
    ) -> Pin<Box<dyn Future<Output = ConfirmStatus> + Send + 'a>> {
        Box::pin(async move {
            tokio::time::sleep(self.pacing).await;
            ConfirmStatus::Confirmed
        })
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
