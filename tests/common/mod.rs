#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::time::Duration;

use actorcore::actor::{ActorBuilder, ActorRef};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;

pub use actorcore::test_utils::{init_test_logging, wait_until};

/// Default seed for property tests when running under CI.
pub const DEFAULT_PROPTEST_SEED: u64 = 0x5EED_5EED;
/// Generous bound for joins and polls; tests normally finish far sooner.
pub const WAIT: Duration = Duration::from_secs(10);

const PROPTEST_SEED_ENV: &str = "ACTORCORE_PROPTEST_SEED";

/// Build a ProptestConfig with deterministic seed support for CI.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    // Honor existing PROPTEST_RNG_SEED, otherwise apply our own.
    if matches!(config.rng_seed, RngSeed::Random) {
        if let Some(seed) = read_proptest_seed() {
            config.rng_seed = RngSeed::Fixed(seed);
        }
    }
    config
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

/// An actor that drops everything it receives until shut down.
pub fn idle_actor() -> ActorRef<u32> {
    ActorBuilder::<u32>::new()
        .spawn(|ctx| loop {
            ctx.receive()?;
        })
        .expect("spawn idle actor")
}
