// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared timer facade: delayed and immediate background tasks with a
//! graceful drain on shutdown.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Window granted to in-flight tasks before outstanding work is cancelled.
const DRAIN_WINDOW: Duration = Duration::from_secs(5);

/// Tracks every timed task of one engine. All tasks race the shutdown token,
/// so a drain can always make progress.
pub struct Scheduler {
    tracker: TaskTracker,
    cancel: CancellationToken,
    drain_window: Duration,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_drain_window(cancel, DRAIN_WINDOW)
    }

    pub fn with_drain_window(cancel: CancellationToken, drain_window: Duration) -> Self {
        Self { tracker: TaskTracker::new(), cancel, drain_window }
    }

    /// Spawn a task immediately.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// Run a task after `delay`.
    pub fn schedule<F>(&self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });
    }

    /// Drain scheduled tasks within the grace window, then cancel whatever is
    /// still outstanding.
    pub async fn shutdown(&self) {
        self.tracker.close();
        if tokio::time::timeout(self.drain_window, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                outstanding = self.tracker.len(),
                "drain window elapsed, cancelling outstanding tasks"
            );
        }
        self.cancel.cancel();
        self.tracker.wait().await;
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
