// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared engine state: configuration, admission collaborators, scheduler,
//! transport, and the aggregated transition channel.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dedup::Deduplicator;
use crate::limiter::RateLimiter;
use crate::machine::Transition;
use crate::ordering::OrderingCoordinator;
use crate::scheduler::Scheduler;
use crate::transport::Transport;

/// Everything a state machine needs besides its own message. One instance
/// per processor, shared by all machines.
pub struct EngineState {
    pub config: EngineConfig,
    pub dedup: Deduplicator,
    pub limiter: RateLimiter,
    pub ordering: OrderingCoordinator,
    pub scheduler: Scheduler,
    pub transport: Box<dyn Transport>,
    /// Aggregated transition channel for external observers.
    pub transition_tx: broadcast::Sender<Transition>,
    pub shutdown: CancellationToken,
}

impl EngineState {
    /// Build the shared state; the returned receiver carries message ids
    /// released by the ordering coordinator.
    pub fn new(
        config: EngineConfig,
        transport: Box<dyn Transport>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let shutdown = CancellationToken::new();
        let (transition_tx, _) = broadcast::channel(256);
        let (ordering, release_rx) = OrderingCoordinator::new(config.ordering.clone());

        let state = Arc::new(Self {
            dedup: Deduplicator::new(&config.dedup),
            limiter: RateLimiter::new(&config.rate_limit),
            ordering,
            scheduler: Scheduler::new(shutdown.clone()),
            transport,
            transition_tx,
            shutdown,
            config,
        });
        (state, release_rx)
    }
}
