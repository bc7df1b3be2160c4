// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The submitter: owns the machine registry, drives submissions to an
//! outcome, and runs the engine's service loops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::dedup::spawn_evictor;
use crate::error::ProcessorError;
use crate::machine::{StateMachine, Transition, TransitionListener};
use crate::message::{epoch_ms, Message, MessageState, ProcessingEvent};
use crate::outcome::{BatchResult, ProcessingResult, ProcessorStats};
use crate::state::EngineState;
use crate::transport::{SimulatedTransport, Transport};

type MachineMap = Arc<RwLock<HashMap<String, Arc<StateMachine>>>>;

struct Counters {
    success: AtomicU64,
    failed: AtomicU64,
    duplicate: AtomicU64,
}

/// Machine listener feeding the processor's terminal-state counters.
struct CounterListener {
    counters: Arc<Counters>,
}

impl TransitionListener for CounterListener {
    fn on_transition(&self, transition: &Transition) -> anyhow::Result<()> {
        match transition.to {
            MessageState::Confirmed => {
                self.counters.success.fetch_add(1, Ordering::AcqRel);
            }
            MessageState::Duplicate => {
                self.counters.duplicate.fetch_add(1, Ordering::AcqRel);
            }
            MessageState::DeadLetter | MessageState::Expired | MessageState::Cancelled => {
                self.counters.failed.fetch_add(1, Ordering::AcqRel);
            }
            _ => {}
        }
        Ok(())
    }
}

/// In-process message processor.
///
/// One instance per pipeline: holds the shared admission collaborators and
/// an owning registry of per-message state machines.
pub struct Processor {
    state: Arc<EngineState>,
    machines: MachineMap,
    counters: Arc<Counters>,
}

impl Processor {
    /// Processor with the bundled simulated transport.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        Self::with_transport(config, Box::new(SimulatedTransport::new()))
    }

    pub fn with_transport(config: EngineConfig, transport: Box<dyn Transport>) -> Arc<Self> {
        let (state, release_rx) = EngineState::new(config, transport);
        let machines: MachineMap = Arc::new(RwLock::new(HashMap::new()));

        spawn_release_loop(Arc::clone(&machines), release_rx, state.shutdown.clone());
        spawn_evictor(Arc::clone(&state));

        Arc::new(Self {
            state,
            machines,
            counters: Arc::new(Counters {
                success: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                duplicate: AtomicU64::new(0),
            }),
        })
    }

    /// Submit a message and resolve its outcome: terminal state, or
    /// `Processing timeout` once the overall deadline expires.
    pub async fn submit(&self, message: Message) -> ProcessingResult {
        let id = message.id().to_owned();

        if self.state.shutdown.is_cancelled() {
            return ProcessingResult::error(
                id,
                message.state(),
                ProcessorError::ShuttingDown.as_str(),
            );
        }

        let machine = StateMachine::new(Arc::clone(&self.state), message);
        machine.add_listener(Arc::new(CounterListener {
            counters: Arc::clone(&self.counters),
        }));

        // First writer owns the registry slot. A resubmission under a live
        // id still runs (the dedup window will catch it) but is not
        // reachable through the lookup APIs.
        {
            let mut machines = self.machines.write().await;
            match machines.entry(id.clone()) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(&machine));
                }
                std::collections::hash_map::Entry::Occupied(_) => {
                    tracing::debug!(message_id = %id,
                        "id already registered, processing unregistered");
                }
            }
        }

        // A message that expired before submission never enters the pipeline.
        let opening = if machine.snapshot().await.is_expired(epoch_ms()) {
            ProcessingEvent::Expire
        } else {
            ProcessingEvent::StartProcessing
        };
        let result = machine.fire(opening).await;
        if let Some(error) = result.error {
            return ProcessingResult::error(&id, machine.current_state().await, error);
        }

        self.await_resting(&machine).await
    }

    /// Submit a batch; per-message results are aggregated in order.
    pub async fn submit_batch(&self, messages: Vec<Message>) -> BatchResult {
        let results = join_all(messages.into_iter().map(|m| self.submit(m))).await;
        BatchResult { results }
    }

    /// Reset a dead-lettered message and run it through the pipeline again.
    pub async fn retry(&self, message_id: &str) -> Result<ProcessingResult, ProcessorError> {
        self.ensure_running()?;
        let machine = self.machine(message_id).await.ok_or(ProcessorError::UnknownMessage)?;

        let reset = machine.fire(ProcessingEvent::Reset).await;
        if !reset.success {
            return Ok(ProcessingResult::error(
                message_id,
                machine.current_state().await,
                "message is not in the dead-letter state",
            ));
        }

        let _ = machine.fire(ProcessingEvent::StartProcessing).await;
        Ok(self.await_resting(&machine).await)
    }

    /// Cancel a message; reports where it ended up.
    pub async fn cancel(&self, message_id: &str) -> Result<ProcessingResult, ProcessorError> {
        self.ensure_running()?;
        let machine = self.machine(message_id).await.ok_or(ProcessorError::UnknownMessage)?;
        let _ = machine
            .fire_with_cause(ProcessingEvent::Cancel, Some("cancelled by caller"))
            .await;
        Ok(ProcessingResult::from_state(message_id, machine.current_state().await))
    }

    /// Archive a terminal message and drop it from the registry.
    pub async fn archive(&self, message_id: &str) -> Result<(), ProcessorError> {
        self.ensure_running()?;
        let machine = self.machine(message_id).await.ok_or(ProcessorError::UnknownMessage)?;

        let result = machine.fire(ProcessingEvent::Archive).await;
        if !result.success {
            return Err(ProcessorError::InvalidState);
        }

        let deadline = tokio::time::Instant::now() + 10 * self.state.config.advance_interval();
        while machine.current_state().await != MessageState::Archived {
            // A shutdown stops the auto-advance that finishes archival;
            // waiting out the deadline would be pointless.
            if self.state.shutdown.is_cancelled() || tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(self.state.config.poll_interval()).await;
        }

        machine.shutdown();
        self.machines.write().await.remove(message_id);
        Ok(())
    }

    pub async fn current_state(&self, message_id: &str) -> Option<MessageState> {
        let machine = self.machine(message_id).await?;
        Some(machine.current_state().await)
    }

    /// Snapshot of a registered message.
    pub async fn message(&self, message_id: &str) -> Option<Message> {
        let machine = self.machine(message_id).await?;
        Some(machine.snapshot().await)
    }

    /// Register an external listener on a message's machine.
    pub async fn add_listener(
        &self,
        message_id: &str,
        listener: Arc<dyn TransitionListener>,
    ) -> Result<(), ProcessorError> {
        self.ensure_running()?;
        let machine = self.machine(message_id).await.ok_or(ProcessorError::UnknownMessage)?;
        machine.add_listener(listener);
        Ok(())
    }

    /// Subscribe to every transition of every machine.
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.state.transition_tx.subscribe()
    }

    pub async fn stats(&self) -> ProcessorStats {
        let mut active = 0;
        {
            let machines = self.machines.read().await;
            for machine in machines.values() {
                if !machine.current_state().await.is_terminal() {
                    active += 1;
                }
            }
        }
        let success = self.counters.success.load(Ordering::Acquire);
        let failed = self.counters.failed.load(Ordering::Acquire);
        let duplicate = self.counters.duplicate.load(Ordering::Acquire);
        let finished = success + failed;
        ProcessorStats {
            active,
            success,
            failed,
            duplicate,
            success_rate: if finished == 0 { 1.0 } else { success as f64 / finished as f64 },
        }
    }

    /// Drain scheduled work (bounded) and stop all service loops.
    pub async fn shutdown(&self) {
        self.state.scheduler.shutdown().await;
    }

    fn ensure_running(&self) -> Result<(), ProcessorError> {
        if self.state.shutdown.is_cancelled() {
            return Err(ProcessorError::ShuttingDown);
        }
        Ok(())
    }

    async fn machine(&self, message_id: &str) -> Option<Arc<StateMachine>> {
        self.machines.read().await.get(message_id).cloned()
    }

    /// Poll a machine until its message rests in a terminal state, up to the
    /// configured overall deadline.
    async fn await_resting(&self, machine: &Arc<StateMachine>) -> ProcessingResult {
        let deadline = tokio::time::Instant::now() + self.state.config.submit_timeout();
        loop {
            let current = machine.current_state().await;
            if current.is_terminal() {
                return ProcessingResult::from_state(machine.id(), current);
            }
            // Once the scheduler is cancelled nothing will advance this
            // message; fail fast instead of spinning to the deadline.
            if self.state.shutdown.is_cancelled() {
                return ProcessingResult::error(
                    machine.id(),
                    current,
                    ProcessorError::ShuttingDown.as_str(),
                );
            }
            if tokio::time::Instant::now() >= deadline {
                return ProcessingResult::timed_out(machine.id(), current);
            }
            tokio::time::sleep(self.state.config.poll_interval()).await;
        }
    }
}

/// Resume machines whose messages the ordering coordinator released.
fn spawn_release_loop(
    machines: MachineMap,
    mut release_rx: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let released = tokio::select! {
                _ = shutdown.cancelled() => break,
                released = release_rx.recv() => released,
            };
            let Some(id) = released else { break };

            let machine = { machines.read().await.get(&id).cloned() };
            let Some(machine) = machine else {
                tracing::debug!(message_id = %id, "released message no longer registered");
                continue;
            };

            let result = machine.fire(ProcessingEvent::OrderReady).await;
            if !result.success {
                tracing::debug!(
                    message_id = %id,
                    from = %result.from,
                    "release arrived after the message moved on"
                );
            }
        }
    });
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
