// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Window-bounded deduplication keyed by message fingerprint.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256, Sha512};
use tokio::sync::RwLock;

use crate::message::{epoch_ms, Message};
use crate::state::EngineState;

/// Entries evicted below this margin under the size cap, so a cache hovering
/// at the cap is not re-trimmed on every pass.
const EVICTION_SLACK: usize = 1_000;

/// Verdict for a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupDecision {
    Unique,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestAlgo {
    Sha256,
    Sha512,
    /// Non-cryptographic fallback for unrecognized algorithm names.
    Fallback,
}

/// Sliding-window duplicate detector.
///
/// The fingerprint map is shared by all in-flight messages; insert-if-absent
/// under the write lock makes concurrent first sightings race-free.
pub struct Deduplicator {
    entries: RwLock<HashMap<String, u64>>,
    window_ms: u64,
    max_cache_size: usize,
    algo: DigestAlgo,
}

impl Deduplicator {
    pub fn new(config: &crate::config::DedupConfig) -> Self {
        let algo = match config.digest_algorithm.to_uppercase().as_str() {
            "SHA-256" | "SHA256" => DigestAlgo::Sha256,
            "SHA-512" | "SHA512" => DigestAlgo::Sha512,
            other => {
                tracing::warn!(
                    algorithm = other,
                    "unknown digest algorithm, falling back to non-cryptographic hash"
                );
                DigestAlgo::Fallback
            }
        };
        Self {
            entries: RwLock::new(HashMap::new()),
            window_ms: config.window_ms,
            max_cache_size: config.max_cache_size,
            algo,
        }
    }

    /// Canonical fingerprint over (topic, body, id, sorted tag pairs).
    ///
    /// The message identifier is part of the fingerprint: two independently
    /// generated messages with identical content are only dedup-equivalent
    /// when the caller supplies the same identifier.
    pub fn fingerprint(&self, message: &Message) -> String {
        let mut tags: Vec<_> =
            message.tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
        tags.sort();

        // 0x1F (unit separator) cannot collide with tag or topic content the
        // way a printable delimiter could.
        let mut canonical = String::new();
        canonical.push_str(&message.topic);
        canonical.push('\u{1f}');
        canonical.push_str(&message.body);
        canonical.push('\u{1f}');
        canonical.push_str(message.id());
        for tag in &tags {
            canonical.push('\u{1f}');
            canonical.push_str(tag);
        }

        match self.algo {
            DigestAlgo::Sha256 => URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())),
            DigestAlgo::Sha512 => URL_SAFE_NO_PAD.encode(Sha512::digest(canonical.as_bytes())),
            DigestAlgo::Fallback => {
                let mut hasher = std::collections::hash_map::DefaultHasher::new();
                canonical.hash(&mut hasher);
                format!("{:016x}", hasher.finish())
            }
        }
    }

    /// Check a message against the window. First sighting (or a sighting
    /// outside the window, which refreshes the entry) is `Unique`.
    pub async fn check(&self, message: &Message) -> DedupDecision {
        let fingerprint = self.fingerprint(message);
        let now = epoch_ms();

        let mut entries = self.entries.write().await;
        match entries.entry(fingerprint) {
            Entry::Vacant(slot) => {
                slot.insert(now);
                DedupDecision::Unique
            }
            Entry::Occupied(mut slot) => {
                if now.saturating_sub(*slot.get()) <= self.window_ms {
                    DedupDecision::Duplicate
                } else {
                    slot.insert(now);
                    DedupDecision::Unique
                }
            }
        }
    }

    /// Run one eviction pass: drop entries older than the window, then trim
    /// by age down to (max − slack) if the cache still exceeds its cap.
    /// Returns (expired, trimmed) counts.
    pub async fn evict_now(&self) -> (usize, usize) {
        let now = epoch_ms();
        let mut entries = self.entries.write().await;

        let before = entries.len();
        entries.retain(|_, ts| now.saturating_sub(*ts) <= self.window_ms);
        let expired = before - entries.len();

        let mut trimmed = 0;
        if entries.len() > self.max_cache_size {
            let target = self.max_cache_size.saturating_sub(EVICTION_SLACK);
            let mut by_age: Vec<_> =
                entries.iter().map(|(k, ts)| (*ts, k.clone())).collect();
            by_age.sort();
            trimmed = entries.len() - target;
            for (_, key) in by_age.into_iter().take(trimmed) {
                entries.remove(&key);
            }
        }

        (expired, trimmed)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Spawn the background eviction task for the engine's deduplicator.
pub fn spawn_evictor(state: Arc<EngineState>) {
    let interval = state.config.dedup.eviction_interval();

    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }

            let (expired, trimmed) = state.dedup.evict_now().await;
            if expired > 0 || trimmed > 0 {
                tracing::debug!(expired, trimmed, "dedup eviction pass");
            }
        }
    });
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
