// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness for end-to-end pipeline scenarios.
//!
//! Builds in-process [`Processor`] instances with test-scale pacing so the
//! full admission → transport → confirm lifecycle runs in milliseconds.

use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use conveyor::config::EngineConfig;
use conveyor::processor::Processor;
use conveyor::transport::SimulatedTransport;

static TRACING_INIT: Once = Once::new();

/// Install a test subscriber honoring `RUST_LOG`.
/// Safe to call multiple times — only the first call has effect.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Default configuration with tightened pacing for fast scenario runs.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.advance_interval_ms = 10;
    config.poll_interval_ms = 10;
    config
}

/// Processor over the simulated transport with test-scale pacing.
pub fn fast_processor(config: EngineConfig) -> Arc<Processor> {
    init_tracing();
    Processor::with_transport(
        config,
        Box::new(SimulatedTransport::with_pacing(Duration::from_millis(5))),
    )
}
