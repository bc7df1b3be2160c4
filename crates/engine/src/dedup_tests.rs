// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::config::DedupConfig;
use crate::message::Message;

fn dedup(window_ms: u64) -> Deduplicator {
    Deduplicator::new(&DedupConfig { window_ms, ..DedupConfig::default() })
}

// ── fingerprint derivation ────────────────────────────────────────────

#[test]
fn same_content_same_id_same_fingerprint() {
    let d = dedup(30_000);
    let a = Message::new("ORDER", "x").with_id("DUP-1");
    let b = Message::new("ORDER", "x").with_id("DUP-1");
    assert_eq!(d.fingerprint(&a), d.fingerprint(&b));
}

#[test]
fn identifier_is_part_of_the_fingerprint() {
    let d = dedup(30_000);
    let a = Message::new("ORDER", "x").with_id("A");
    let b = Message::new("ORDER", "x").with_id("B");
    assert_ne!(d.fingerprint(&a), d.fingerprint(&b));
}

#[test]
fn tag_order_does_not_matter() {
    let d = dedup(30_000);
    let a = Message::new("t", "b").with_id("M").with_tag("k1", "v1").with_tag("k2", "v2");
    let b = Message::new("t", "b").with_id("M").with_tag("k2", "v2").with_tag("k1", "v1");
    assert_eq!(d.fingerprint(&a), d.fingerprint(&b));
}

#[test]
fn tag_values_change_the_fingerprint() {
    let d = dedup(30_000);
    let a = Message::new("t", "b").with_id("M").with_tag("k", "v1");
    let b = Message::new("t", "b").with_id("M").with_tag("k", "v2");
    assert_ne!(d.fingerprint(&a), d.fingerprint(&b));
}

#[test]
fn unknown_algorithm_falls_back_without_failing() {
    let d = Deduplicator::new(&DedupConfig {
        digest_algorithm: "WHIRLPOOL".into(),
        ..DedupConfig::default()
    });
    let msg = Message::new("t", "b").with_id("M");
    let fp = d.fingerprint(&msg);
    assert_eq!(fp.len(), 16, "fallback emits a 64-bit hex digest");
    assert_eq!(fp, d.fingerprint(&msg));
}

#[test]
fn sha512_is_selectable() {
    let d = Deduplicator::new(&DedupConfig {
        digest_algorithm: "SHA-512".into(),
        ..DedupConfig::default()
    });
    let msg = Message::new("t", "b").with_id("M");
    // 64 digest bytes → 86 base64url chars, vs 43 for SHA-256.
    assert_eq!(d.fingerprint(&msg).len(), 86);
}

// ── window semantics ──────────────────────────────────────────────────

#[tokio::test]
async fn first_sighting_is_unique_second_is_duplicate() {
    let d = dedup(30_000);
    let msg = Message::new("ORDER", "x").with_id("DUP-1");

    assert_eq!(d.check(&msg).await, DedupDecision::Unique);
    assert_eq!(d.check(&msg).await, DedupDecision::Duplicate);
    assert_eq!(d.len().await, 1);
}

#[tokio::test]
async fn sighting_outside_window_refreshes_and_passes() {
    let d = dedup(0);
    let msg = Message::new("ORDER", "x").with_id("DUP-1");

    assert_eq!(d.check(&msg).await, DedupDecision::Unique);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    // Window of zero: the earlier entry is already stale.
    assert_eq!(d.check(&msg).await, DedupDecision::Unique);
    assert_eq!(d.len().await, 1, "refresh overwrites in place");
}

#[tokio::test]
async fn different_ids_do_not_collide() {
    let d = dedup(30_000);
    let a = Message::new("ORDER", "x").with_id("A");
    let b = Message::new("ORDER", "x").with_id("B");

    assert_eq!(d.check(&a).await, DedupDecision::Unique);
    assert_eq!(d.check(&b).await, DedupDecision::Unique);
}

// ── eviction ──────────────────────────────────────────────────────────

#[tokio::test]
async fn eviction_drops_stale_entries() {
    let d = dedup(0);
    for i in 0..10 {
        let msg = Message::new("t", "b").with_id(format!("M-{i}"));
        d.check(&msg).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let (expired, trimmed) = d.evict_now().await;
    assert_eq!(expired, 10);
    assert_eq!(trimmed, 0);
    assert!(d.is_empty().await);
}

#[tokio::test]
async fn eviction_keeps_entries_inside_window() {
    let d = dedup(60_000);
    for i in 0..10 {
        let msg = Message::new("t", "b").with_id(format!("M-{i}"));
        d.check(&msg).await;
    }

    let (expired, trimmed) = d.evict_now().await;
    assert_eq!(expired, 0);
    assert_eq!(trimmed, 0);
    assert_eq!(d.len().await, 10);
}

#[tokio::test]
async fn size_cap_trims_oldest_with_slack() {
    let d = Deduplicator::new(&DedupConfig {
        window_ms: 600_000,
        max_cache_size: 1_005,
        ..DedupConfig::default()
    });
    for i in 0..1_010 {
        let msg = Message::new("t", "b").with_id(format!("M-{i}"));
        d.check(&msg).await;
    }
    assert_eq!(d.len().await, 1_010);

    let (expired, trimmed) = d.evict_now().await;
    assert_eq!(expired, 0);
    // Trimmed down to max − slack = 5 entries.
    assert_eq!(trimmed, 1_005);
    assert_eq!(d.len().await, 5);
}

// ── concurrency ───────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_checks_admit_exactly_one() {
    let d = std::sync::Arc::new(dedup(30_000));

    let mut handles = Vec::new();
    for _ in 0..16 {
        let d = std::sync::Arc::clone(&d);
        handles.push(tokio::spawn(async move {
            let msg = Message::new("ORDER", "x").with_id("RACE-1");
            d.check(&msg).await
        }));
    }

    let mut unique = 0;
    for handle in handles {
        if let Ok(DedupDecision::Unique) = handle.await {
            unique += 1;
        }
    }
    assert_eq!(unique, 1, "insert-if-absent admits exactly one of N racers");
}
