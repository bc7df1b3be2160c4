// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::config::EngineConfig;
use crate::outcome::Outcome;
use crate::transport::TAG_SIMULATE_FAILURE;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.advance_interval_ms = 10;
    config.poll_interval_ms = 10;
    config.retry.base_delay_ms = 10;
    config.retry.backoff_multiplier = 1.0;
    config
}

fn fast_processor(config: EngineConfig) -> Arc<Processor> {
    Processor::with_transport(
        config,
        Box::new(SimulatedTransport::with_pacing(Duration::from_millis(5))),
    )
}

/// Spin until a concurrently submitted message appears in the registry.
async fn wait_registered(processor: &Processor, id: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while processor.current_state(id).await.is_none() {
        if tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

// ── submission ────────────────────────────────────────────────────────

#[tokio::test]
async fn clean_submission_confirms() {
    let processor = fast_processor(fast_config());

    let result = processor.submit(Message::new("ORDER", "x").with_priority(5)).await;
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.state, MessageState::Confirmed);
}

#[tokio::test]
async fn same_id_twice_is_success_then_duplicate() {
    let processor = fast_processor(fast_config());

    let first = processor.submit(Message::new("ORDER", "x").with_id("DUP-1")).await;
    assert_eq!(first.outcome, Outcome::Success);

    let second = processor.submit(Message::new("ORDER", "x").with_id("DUP-1")).await;
    assert_eq!(second.outcome, Outcome::Duplicate);
    assert_eq!(second.state, MessageState::Duplicate);

    // The registry still answers for the first machine.
    assert_eq!(processor.current_state("DUP-1").await, Some(MessageState::Confirmed));
}

#[tokio::test]
async fn batch_aggregates_in_submission_order() {
    let processor = fast_processor(fast_config());

    let batch = processor
        .submit_batch(vec![
            Message::new("ORDER", "a").with_id("B-1"),
            Message::new("ORDER", "b").with_id("B-2"),
            Message::new("ORDER", "c").with_id("B-3"),
        ])
        .await;

    assert_eq!(batch.results.len(), 3);
    assert_eq!(batch.count_with(Outcome::Success), 3);
    let ids: Vec<_> = batch.results.iter().map(|r| r.message_id.as_str()).collect();
    assert_eq!(ids, ["B-1", "B-2", "B-3"]);
}

#[tokio::test]
async fn pre_expired_message_never_enters_the_pipeline() {
    let processor = fast_processor(fast_config());
    let msg = Message::new("ORDER", "x").with_ttl_ms(0);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let result = processor.submit(msg).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.state, MessageState::Expired);
    assert_eq!(result.detail.as_deref(), Some("Message expired"));
}

// ── failure and retry ─────────────────────────────────────────────────

#[tokio::test]
async fn failing_message_dead_letters_and_can_be_retried() {
    let processor = fast_processor(fast_config());
    let msg = Message::new("ORDER", "x")
        .with_id("F-1")
        .with_tag(TAG_SIMULATE_FAILURE, "true")
        .with_max_retries(1);

    let result = processor.submit(msg).await;
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.state, MessageState::DeadLetter);

    // An explicit retry grants one more pass; the transport still fails, so
    // the message returns to the dead-letter state.
    let retried = processor.retry("F-1").await;
    assert!(matches!(&retried, Ok(r) if r.state == MessageState::DeadLetter));
}

#[tokio::test]
async fn retry_of_a_non_dead_letter_message_is_an_error_outcome() {
    let processor = fast_processor(fast_config());
    processor.submit(Message::new("ORDER", "x").with_id("OK-1")).await;

    let result = processor.retry("OK-1").await;
    assert!(matches!(&result, Ok(r) if r.outcome == Outcome::Error));
}

#[tokio::test]
async fn retry_of_an_unknown_id_is_an_api_error() {
    let processor = fast_processor(fast_config());
    assert_eq!(processor.retry("nope").await, Err(ProcessorError::UnknownMessage));
}

// ── cancellation ──────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_shortly_after_submit_fails_with_cancelled_cause() {
    let processor = fast_processor(fast_config());

    let submit = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor.submit(Message::new("ORDER", "x").with_id("C-1")).await
        })
    };

    wait_registered(&processor, "C-1").await;
    let cancelled = processor.cancel("C-1").await;
    assert!(matches!(&cancelled, Ok(r) if r.state == MessageState::Cancelled));

    let result = submit.await.unwrap_or_else(|_| {
        ProcessingResult::error("C-1", MessageState::Init, "join failed")
    });
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.detail.as_deref(), Some("Message cancelled"));
}

#[tokio::test]
async fn cancel_unknown_id_is_an_api_error() {
    let processor = fast_processor(fast_config());
    assert_eq!(processor.cancel("nope").await, Err(ProcessorError::UnknownMessage));
}

// ── ordering ──────────────────────────────────────────────────────────

#[tokio::test]
async fn partitioned_sequences_confirm_in_order() {
    let mut config = fast_config();
    config.ordering.enabled = true;
    let processor = fast_processor(config);
    let mut events = processor.subscribe();

    let arrival = [3u64, 1, 5, 2, 6, 4];
    let batch = processor
        .submit_batch(
            arrival
                .iter()
                .map(|seq| {
                    Message::new("ORDER", "x")
                        .with_id(format!("S-{seq}"))
                        .with_partition_key("p1")
                        .with_sequence(*seq)
                })
                .collect(),
        )
        .await;
    assert_eq!(batch.count_with(Outcome::Success), 6, "{:?}", batch.results);

    let mut confirmed = Vec::new();
    while let Ok(transition) = events.try_recv() {
        if transition.to == MessageState::Confirmed {
            confirmed.push(transition.message.sequence());
        }
    }
    assert_eq!(confirmed, [1, 2, 3, 4, 5, 6]);
}

// ── observation ───────────────────────────────────────────────────────

#[tokio::test]
async fn current_state_tracks_the_registry() {
    let processor = fast_processor(fast_config());
    assert_eq!(processor.current_state("nope").await, None);

    processor.submit(Message::new("ORDER", "x").with_id("V-1")).await;
    assert_eq!(processor.current_state("V-1").await, Some(MessageState::Confirmed));
}

#[tokio::test]
async fn stats_count_outcomes() {
    let processor = fast_processor(fast_config());

    processor.submit(Message::new("ORDER", "ok").with_id("ST-1")).await;
    processor
        .submit(
            Message::new("ORDER", "bad")
                .with_id("ST-2")
                .with_tag(TAG_SIMULATE_FAILURE, "true")
                .with_max_retries(0),
        )
        .await;

    let stats = processor.stats().await;
    assert_eq!(stats.success, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.duplicate, 0);
    assert_eq!(stats.active, 0);
    assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn subscribe_delivers_transitions_for_all_machines() {
    let processor = fast_processor(fast_config());
    let mut events = processor.subscribe();

    processor.submit(Message::new("ORDER", "x").with_id("E-1")).await;

    let mut seen = 0;
    while let Ok(transition) = events.try_recv() {
        assert_eq!(transition.message.id(), "E-1");
        seen += 1;
    }
    assert!(seen >= 7, "expected the full pipeline on the aggregated channel");
}

// ── archival and shutdown ─────────────────────────────────────────────

#[tokio::test]
async fn archive_drops_the_machine_from_the_registry() {
    let processor = fast_processor(fast_config());
    processor.submit(Message::new("ORDER", "x").with_id("A-1")).await;

    assert_eq!(processor.archive("A-1").await, Ok(()));
    assert_eq!(processor.current_state("A-1").await, None);
}

#[tokio::test]
async fn archive_of_an_active_message_is_invalid() {
    let processor = fast_processor(fast_config());

    let submit = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor.submit(Message::new("ORDER", "x").with_id("A-2")).await
        })
    };
    wait_registered(&processor, "A-2").await;

    assert_eq!(processor.archive("A-2").await, Err(ProcessorError::InvalidState));
    let _ = submit.await;
}

#[tokio::test]
async fn submissions_after_shutdown_are_refused() {
    let processor = fast_processor(fast_config());
    processor.shutdown().await;

    let result = processor.submit(Message::new("ORDER", "x")).await;
    assert_eq!(result.outcome, Outcome::Error);
    assert_eq!(result.detail.as_deref(), Some(ProcessorError::ShuttingDown.as_str()));
}

#[tokio::test]
async fn control_apis_fail_fast_after_shutdown() {
    struct Noop;
    impl TransitionListener for Noop {
        fn on_transition(&self, _transition: &Transition) -> anyhow::Result<()> {
            Ok(())
        }
    }

    let processor = fast_processor(fast_config());
    processor.submit(Message::new("ORDER", "x").with_id("SD-1")).await;
    processor.shutdown().await;

    assert!(matches!(processor.retry("SD-1").await, Err(ProcessorError::ShuttingDown)));
    assert!(matches!(processor.cancel("SD-1").await, Err(ProcessorError::ShuttingDown)));
    assert_eq!(processor.archive("SD-1").await, Err(ProcessorError::ShuttingDown));
    assert_eq!(
        processor.add_listener("SD-1", Arc::new(Noop)).await,
        Err(ProcessorError::ShuttingDown)
    );
}
