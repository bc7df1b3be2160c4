// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end pipeline scenarios against the public processor API.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use conveyor::message::{Message, MessageState};
use conveyor::outcome::Outcome;
use conveyor::transport::TAG_SIMULATE_FAILURE;
use conveyor_specs::{fast_config, fast_processor};

// -- S1: clean submission -----------------------------------------------------

#[tokio::test]
async fn s1_default_message_confirms() {
    let processor = fast_processor(fast_config());

    let result = processor.submit(Message::new("ORDER", "x").with_priority(5)).await;

    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(result.state, MessageState::Confirmed);
}

// -- S2: duplicate detection --------------------------------------------------

#[tokio::test]
async fn s2_identical_ids_resolve_success_and_duplicate() {
    let mut config = fast_config();
    config.dedup.window_ms = 30_000;
    let processor = fast_processor(config);

    let first = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor.submit(Message::new("ORDER", "x").with_id("DUP-1")).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = processor.submit(Message::new("ORDER", "x").with_id("DUP-1")).await;

    let first = first.await.unwrap_or_else(|_| {
        conveyor::outcome::ProcessingResult::error("DUP-1", MessageState::Init, "join failed")
    });
    let outcomes = [first.outcome, second.outcome];
    assert!(outcomes.contains(&Outcome::Success), "{outcomes:?}");
    assert!(outcomes.contains(&Outcome::Duplicate), "{outcomes:?}");
}

// -- S3: rate-limited burst ---------------------------------------------------

#[tokio::test]
async fn s3_burst_of_eight_against_a_bucket_of_five() -> anyhow::Result<()> {
    let mut config = conveyor::config::EngineConfig::from_json(
        r#"{
            "rate_limit": {
                "tokens_per_second": 3,
                "capacity": 5,
                "recovery_check_interval_ms": 1000
            }
        }"#,
    )?;
    config.advance_interval_ms = 10;
    config.poll_interval_ms = 10;
    let processor = fast_processor(config);
    let mut events = processor.subscribe();

    let batch = processor
        .submit_batch(
            (0..8)
                .map(|i| Message::new("ORDER", format!("burst-{i}")).with_id(format!("RL-{i}")))
                .collect(),
        )
        .await;

    assert_eq!(batch.count_with(Outcome::Success), 8, "{:?}", batch.results);

    // Exactly the overflow (8 − capacity 5 = 3) was parked before recovering.
    let mut parked = HashSet::new();
    while let Ok(transition) = events.try_recv() {
        if transition.to == MessageState::RateLimited {
            parked.insert(transition.message.id().to_owned());
        }
    }
    assert_eq!(parked.len(), 3, "parked: {parked:?}");
    Ok(())
}

// -- S4: ordered release ------------------------------------------------------

#[tokio::test]
async fn s4_shuffled_sequences_confirm_in_order() {
    let mut config = fast_config();
    config.ordering.enabled = true;
    let processor = fast_processor(config);
    let mut events = processor.subscribe();

    let batch = processor
        .submit_batch(
            [3u64, 1, 5, 2, 6, 4]
                .into_iter()
                .map(|seq| {
                    Message::new("ORDER", "x")
                        .with_id(format!("SEQ-{seq}"))
                        .with_partition_key("p1")
                        .with_sequence(seq)
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

// -- S5: retry exhaustion -----------------------------------------------------

#[tokio::test]
async fn s5_persistent_failure_dead_letters_after_two_retries() {
    let mut config = fast_config();
    config.retry.base_delay_ms = 500;
    config.retry.backoff_multiplier = 1.5;
    config.retry.max_delay_ms = 5_000;
    config.retry.max_retries = 2;
    let processor = fast_processor(config);
    let mut events = processor.subscribe();

    let result = processor
        .submit(
            Message::new("ORDER", "x")
                .with_id("FAIL-1")
                .with_tag(TAG_SIMULATE_FAILURE, "true"),
        )
        .await;

    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.state, MessageState::DeadLetter);

    let message = processor.message("FAIL-1").await;
    assert_eq!(message.map(|m| m.retry_count()), Some(2));

    // Initial attempt plus two retries: three observed failures.
    let mut failures = 0;
    while let Ok(transition) = events.try_recv() {
        if transition.to == MessageState::Failed {
            failures += 1;
        }
    }
    assert_eq!(failures, 3);
}

// -- S6: cancellation ---------------------------------------------------------

#[tokio::test]
async fn s6_cancel_during_dedup_checking() {
    // Default pacing: the pipeline sits in dedup_checking for ~100 ms, so a
    // cancel at 50 ms lands inside the admission phase.
    let mut config = fast_config();
    config.advance_interval_ms = 100;
    let processor = fast_processor(config);
    let mut events = processor.subscribe();

    let submit = {
        let processor = Arc::clone(&processor);
        tokio::spawn(async move {
            processor.submit(Message::new("ORDER", "x").with_id("CXL-1")).await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = processor.cancel("CXL-1").await;
    assert!(matches!(&cancelled, Ok(r) if r.state == MessageState::Cancelled));

    let result = submit.await.unwrap_or_else(|_| {
        conveyor::outcome::ProcessingResult::error("CXL-1", MessageState::Init, "join failed")
    });
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(result.detail.as_deref(), Some("Message cancelled"));

    let mut cancel_from = None;
    while let Ok(transition) = events.try_recv() {
        if transition.to == MessageState::Cancelled {
            cancel_from = Some(transition.from);
        }
    }
    assert_eq!(cancel_from, Some(MessageState::DedupChecking));
}
