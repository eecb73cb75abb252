#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use parking_lot::Mutex;
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use std::sync::Arc;
use weft::callback::Callback;
use weft::error::Status;
use weft::runtime::IoContext;
use weft::time::TimeSource;
use weft::types::Time;

pub use weft::test_utils::{init_test_logging, init_test_logging_with_level};

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "WEFT_PROPTEST_SEED";
const PROPTEST_MAX_SHRINK_ITERS_ENV: &str = "WEFT_PROPTEST_MAX_SHRINK_ITERS";

/// Configuration for property tests with optional deterministic seed support.
#[derive(Debug, Clone)]
pub struct PropertyTestConfig {
    /// Fixed seed for reproducibility (overrides CI default when set).
    pub seed: Option<u64>,
    /// Number of successful cases required.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl PropertyTestConfig {
    /// Build a config with defaults for property tests.
    #[must_use]
    pub fn new(cases: u32) -> Self {
        Self {
            seed: read_proptest_seed(),
            cases,
            max_shrink_iters: read_max_shrink_iters()
                .unwrap_or(ProptestConfig::default().max_shrink_iters),
        }
    }

    /// Convert into a ProptestConfig, applying deterministic seed rules.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        let mut config = ProptestConfig::with_cases(self.cases);

        // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
        if matches!(config.rng_seed, RngSeed::Random) {
            if let Some(seed) = self.seed {
                config.rng_seed = RngSeed::Fixed(seed);
            }
        }

        config.max_shrink_iters = self.max_shrink_iters;
        config
    }
}

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    PropertyTestConfig::new(cases).to_proptest_config()
}

fn read_proptest_seed() -> Option<u64> {
    if let Ok(value) = std::env::var(PROPTEST_SEED_ENV) {
        return value.parse::<u64>().ok();
    }

    // If CI is set and no explicit seed is provided, use a fixed seed.
    if std::env::var("CI").is_ok() {
        return Some(DEFAULT_PROPTEST_SEED);
    }

    None
}

fn read_max_shrink_iters() -> Option<u32> {
    std::env::var(PROPTEST_MAX_SHRINK_ITERS_ENV)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
}

/// Create a context driven by a virtual clock, with logging initialized.
#[must_use]
pub fn virtual_context() -> IoContext {
    init_test_logging();
    IoContext::with_virtual_clock()
}

/// One completion observed by a [`Recorder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    /// Caller-chosen label.
    pub tag: u32,
    /// Status the handler received.
    pub status: Status,
    /// Clock reading when the handler ran.
    pub at: Time,
}

/// Collects timeout completions in the order their handlers ran.
#[derive(Clone)]
pub struct Recorder {
    log: Arc<Mutex<Vec<Completion>>>,
    clock: Arc<dyn TimeSource>,
}

impl Recorder {
    /// Create a recorder reading time from `ctx`.
    #[must_use]
    pub fn new(ctx: &IoContext) -> Self {
        Self {
            log: Arc::default(),
            clock: ctx.clock(),
        }
    }

    /// A handler that records `tag` when it runs.
    #[must_use]
    pub fn handler(&self, tag: u32) -> Callback<Status> {
        let log = Arc::clone(&self.log);
        let clock = Arc::clone(&self.clock);
        Callback::new(move |status| {
            log.lock().push(Completion {
                tag,
                status,
                at: clock.now(),
            });
        })
    }

    /// Everything recorded so far.
    #[must_use]
    pub fn completions(&self) -> Vec<Completion> {
        self.log.lock().clone()
    }

    /// Tags recorded so far, in order.
    #[must_use]
    pub fn tags(&self) -> Vec<u32> {
        self.log.lock().iter().map(|c| c.tag).collect()
    }
}
