// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-message state machine: serialized transitions, driver-event
//! resolution, listener fan-out, and post-transition scheduling.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::dedup::DedupDecision;
use crate::message::{epoch_ms, Message, MessageState, ProcessingEvent};
use crate::ordering::OrderDecision;
use crate::outcome::TransitionResult;
use crate::state::EngineState;
use crate::table;
use crate::transport::{ConfirmStatus, SendStatus};

/// One committed transition, as delivered to listeners and the aggregated
/// channel. Carries a post-commit snapshot of the message.
#[derive(Debug, Clone)]
pub struct Transition {
    pub message: Message,
    pub from: MessageState,
    pub to: MessageState,
    pub event: ProcessingEvent,
    pub cause: Option<String>,
    /// Per-machine transition counter; scheduled tasks use it to detect
    /// state drift.
    pub seq: u64,
}

/// Observer of a single machine's transitions.
///
/// Called under the machine's transition lock: implementations must not
/// block and must not fire events on their own machine synchronously.
/// Errors are logged and swallowed; they never affect the transition or
/// other listeners.
pub trait TransitionListener: Send + Sync {
    fn on_transition(&self, transition: &Transition) -> anyhow::Result<()>;
}

struct Cell {
    message: Message,
    seq: u64,
}

/// State machine owning one message.
///
/// `fire` serializes all transition work per instance; machines for
/// different messages advance in parallel.
pub struct StateMachine {
    id: String,
    engine: Arc<EngineState>,
    cell: Mutex<Cell>,
    listeners: std::sync::RwLock<Vec<Arc<dyn TransitionListener>>>,
    cancel: CancellationToken,
}

impl StateMachine {
    pub fn new(engine: Arc<EngineState>, mut message: Message) -> Arc<Self> {
        message.apply_default_max_retries(engine.config.retry.max_retries);
        let cancel = engine.shutdown.child_token();
        Arc::new(Self {
            id: message.id().to_owned(),
            engine,
            cell: Mutex::new(Cell { message, seq: 0 }),
            listeners: std::sync::RwLock::new(Vec::new()),
            cancel,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn current_state(&self) -> MessageState {
        self.cell.lock().await.message.state()
    }

    /// Post-commit copy of the owned message.
    pub async fn snapshot(&self) -> Message {
        self.cell.lock().await.message.clone()
    }

    pub fn add_listener(&self, listener: Arc<dyn TransitionListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Whether the table accepts `event` in the current state.
    pub async fn can_fire(&self, event: ProcessingEvent) -> bool {
        table::accepts(self.cell.lock().await.message.state(), event)
    }

    /// Administrative override: place the machine in a state without
    /// consulting the table. No listeners run and no work is scheduled.
    pub async fn force_state(&self, state: MessageState) {
        let mut cell = self.cell.lock().await;
        cell.message.set_state(state);
        cell.seq += 1;
    }

    /// Stop this machine's pending scheduled work.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub async fn fire(self: &Arc<Self>, event: ProcessingEvent) -> TransitionResult {
        self.fire_with_cause(event, None).await
    }

    /// Drive one transition. Lookup, pre-transition checks, commit, listener
    /// notification, and post-transition scheduling run atomically with
    /// respect to other `fire` calls on this machine.
    pub async fn fire_with_cause(
        self: &Arc<Self>,
        event: ProcessingEvent,
        cause: Option<&str>,
    ) -> TransitionResult {
        let mut cell = self.cell.lock().await;
        let from = cell.message.state();

        if !table::accepts(from, event) {
            return TransitionResult::invalid(from, event);
        }

        // Driver events resolve against the admission collaborators; the
        // check's verdict substitutes the effective event.
        let effective = match self.resolve(event, &cell.message).await {
            Ok(effective) => effective,
            Err(e) => {
                tracing::warn!(message_id = %self.id, event = %event, err = %e,
                    "pre-transition work failed");
                return TransitionResult::error(from, event, e.to_string());
            }
        };

        let Some(to) = table::next_state(from, effective, &cell.message) else {
            return TransitionResult::invalid(from, effective);
        };

        // The one guarded mutation: an admitted retry preparation consumes
        // a retry credit.
        if effective == ProcessingEvent::PrepareRetry && to == MessageState::RetryPreparing {
            cell.message.increment_retry();
        }

        cell.message.set_state(to);
        cell.seq += 1;

        let transition = Transition {
            message: cell.message.clone(),
            from,
            to,
            event: effective,
            cause: cause.map(str::to_owned),
            seq: cell.seq,
        };
        self.notify(&transition);
        let _ = self.engine.transition_tx.send(transition.clone());

        self.after_commit(from, to, cell.seq, &cell.message);
        TransitionResult::success(from, to, effective)
    }

    async fn resolve(
        &self,
        event: ProcessingEvent,
        message: &Message,
    ) -> anyhow::Result<ProcessingEvent> {
        match event {
            ProcessingEvent::CheckDedup => {
                Ok(match self.engine.dedup.check(message).await {
                    DedupDecision::Unique => ProcessingEvent::DedupPass,
                    DedupDecision::Duplicate => ProcessingEvent::DedupDuplicate,
                })
            }
            ProcessingEvent::CheckRateLimit => {
                Ok(if self.engine.limiter.try_acquire(1) {
                    ProcessingEvent::RateLimitPass
                } else {
                    ProcessingEvent::RateLimitExceeded
                })
            }
            ProcessingEvent::CheckOrder => {
                if !self.engine.config.ordering.enabled {
                    return Ok(ProcessingEvent::Preprocess);
                }
                Ok(match self.engine.ordering.admit(message).await {
                    OrderDecision::Ready => ProcessingEvent::Preprocess,
                    OrderDecision::Parked => ProcessingEvent::CheckOrder,
                    // The coordinator owns the late-sequence policy: the
                    // tolerant policy parks inside admit(), so Late always
                    // means the failure path.
                    OrderDecision::Late => ProcessingEvent::Fail,
                })
            }
            other => Ok(other),
        }
    }

    fn notify(&self, transition: &Transition) {
        let Ok(listeners) = self.listeners.read() else {
            return;
        };
        for listener in listeners.iter() {
            if let Err(e) = listener.on_transition(transition) {
                tracing::warn!(message_id = %self.id, err = %e, "transition listener failed");
            }
        }
    }

    // -- Post-transition scheduling ------------------------------------------

    fn after_commit(
        self: &Arc<Self>,
        from: MessageState,
        to: MessageState,
        seq: u64,
        message: &Message,
    ) {
        // A message that left the waiting area by timeout/cancel/expiry must
        // not linger in the partition queue. Normal releases were already
        // removed by the coordinator's release scan.
        if from == MessageState::OrderingWait && to != MessageState::Preprocessing {
            let engine = Arc::clone(&self.engine);
            let snapshot = message.clone();
            self.engine.scheduler.spawn(async move {
                engine.ordering.remove(&snapshot).await;
            });
        }

        match to {
            MessageState::DedupChecking => {
                self.arm_timeout(to, seq);
                self.auto_advance(to, seq, ProcessingEvent::CheckDedup);
            }
            MessageState::RateLimiting => {
                self.arm_timeout(to, seq);
                self.auto_advance(to, seq, ProcessingEvent::CheckRateLimit);
            }
            MessageState::RateLimited => {
                self.spawn_recovery(seq);
            }
            MessageState::Queued => {
                self.auto_advance(to, seq, ProcessingEvent::CheckOrder);
            }
            MessageState::OrderingWait => {
                self.arm_timeout(to, seq);
            }
            MessageState::Preprocessing => {
                self.arm_timeout(to, seq);
                self.auto_advance(to, seq, ProcessingEvent::PreprocessComplete);
            }
            MessageState::Sending => {
                self.arm_timeout(to, seq);
                self.spawn_send(to, seq);
            }
            MessageState::Sent => {
                self.arm_timeout(to, seq);
                self.spawn_confirm(seq);
            }
            MessageState::PartialConfirmed => {
                self.arm_timeout(to, seq);
            }
            MessageState::Failed | MessageState::Timeout => {
                self.auto_advance(to, seq, ProcessingEvent::PrepareRetry);
            }
            MessageState::RetryPreparing => {
                self.auto_advance(to, seq, ProcessingEvent::DelayRetry);
            }
            MessageState::RetryDelayed => {
                let delay = self
                    .engine
                    .config
                    .retry
                    .delay_for(message.retry_count().saturating_sub(1));
                let machine = Arc::clone(self);
                self.engine.scheduler.schedule(delay, async move {
                    if machine.still_at(MessageState::RetryDelayed, seq).await {
                        let _ = machine.fire(ProcessingEvent::RetryResume).await;
                    }
                });
            }
            MessageState::Retrying => {
                self.spawn_send(to, seq);
            }
            MessageState::Confirmed => {
                if self.engine.config.ordering.enabled {
                    let engine = Arc::clone(&self.engine);
                    let snapshot = message.clone();
                    self.engine.scheduler.spawn(async move {
                        engine.ordering.complete(&snapshot).await;
                    });
                }
            }
            MessageState::Archiving => {
                self.auto_advance(to, seq, ProcessingEvent::ArchiveComplete);
            }
            _ => {}
        }
    }

    /// After the pacing delay, fire the deterministic next event for an
    /// interior state — unless the message moved on or expired meanwhile.
    fn auto_advance(self: &Arc<Self>, expect: MessageState, seq: u64, event: ProcessingEvent) {
        let machine = Arc::clone(self);
        let delay = self.engine.config.advance_interval();
        self.engine.scheduler.schedule(delay, async move {
            if machine.cancel.is_cancelled() || !machine.still_at(expect, seq).await {
                return;
            }
            if machine.expired().await {
                let expired = machine.fire_with_cause(ProcessingEvent::Expire, None).await;
                if expired.success {
                    return;
                }
            }
            let _ = machine.fire(event).await;
        });
    }

    fn arm_timeout(self: &Arc<Self>, state: MessageState, seq: u64) {
        let Some(deadline) = self.engine.config.timeout.for_state(state) else {
            return;
        };
        let machine = Arc::clone(self);
        self.engine.scheduler.schedule(deadline, async move {
            if machine.cancel.is_cancelled() || !machine.still_at(state, seq).await {
                return;
            }
            let _ = machine
                .fire_with_cause(ProcessingEvent::Timeout, Some("state deadline elapsed"))
                .await;
        });
    }

    fn spawn_send(self: &Arc<Self>, expect: MessageState, seq: u64) {
        let machine = Arc::clone(self);
        self.engine.scheduler.spawn(async move {
            let snapshot = machine.snapshot().await;
            let status = machine.engine.transport.send(&snapshot).await;
            if machine.cancel.is_cancelled() || !machine.still_at(expect, seq).await {
                return;
            }
            match status {
                SendStatus::Accepted => {
                    let _ = machine.fire(ProcessingEvent::Sent).await;
                }
                SendStatus::Failed { reason } => {
                    let _ = machine
                        .fire_with_cause(ProcessingEvent::Fail, Some(reason.as_str()))
                        .await;
                }
            }
        });
    }

    fn spawn_confirm(self: &Arc<Self>, seq: u64) {
        let machine = Arc::clone(self);
        self.engine.scheduler.spawn(async move {
            let snapshot = machine.snapshot().await;
            let status = machine.engine.transport.confirm(&snapshot).await;
            if machine.cancel.is_cancelled() || !machine.still_at(MessageState::Sent, seq).await
            {
                return;
            }
            match status {
                ConfirmStatus::Confirmed => {
                    let _ = machine.fire(ProcessingEvent::Confirm).await;
                }
                ConfirmStatus::Partial => {
                    let _ = machine.fire(ProcessingEvent::PartialConfirm).await;
                }
                ConfirmStatus::Failed { reason } => {
                    let _ = machine
                        .fire_with_cause(ProcessingEvent::Fail, Some(reason.as_str()))
                        .await;
                }
            }
        });
    }

    /// Recurring recovery tick for a rate-limited message. Re-arms
    /// unconditionally; stops on state drift, token grant, or shutdown.
    fn spawn_recovery(self: &Arc<Self>, seq: u64) {
        let machine = Arc::clone(self);
        let interval = self.engine.config.rate_limit.recovery_check_interval();
        self.engine.scheduler.spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tick.tick().await; // the first tick completes immediately

            loop {
                tick.tick().await;
                if machine.cancel.is_cancelled()
                    || !machine.still_at(MessageState::RateLimited, seq).await
                {
                    break;
                }
                if machine.expired().await {
                    let _ = machine.fire(ProcessingEvent::Expire).await;
                    break;
                }
                if machine.engine.limiter.try_acquire(1) {
                    let _ = machine.fire(ProcessingEvent::RateLimitRecovered).await;
                    break;
                }
            }
        });
    }

    async fn still_at(&self, state: MessageState, seq: u64) -> bool {
        let cell = self.cell.lock().await;
        cell.message.state() == state && cell.seq == seq
    }

    async fn expired(&self) -> bool {
        self.cell.lock().await.message.is_expired(epoch_ms())
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
