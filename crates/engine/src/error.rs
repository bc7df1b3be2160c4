// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes for the processor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessorError {
    UnknownMessage,
    InvalidState,
    ShuttingDown,
}

impl ProcessorError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownMessage => "UNKNOWN_MESSAGE",
            Self::InvalidState => "INVALID_STATE",
            Self::ShuttingDown => "SHUTTING_DOWN",
        }
    }
}

impl fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for ProcessorError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
