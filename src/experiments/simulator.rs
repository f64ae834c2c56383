//! Synthetic per-variant metrics for demos and previews.
//!
//! Stands in for a real analytics feed. The random source is injected so the
//! same code path serves reproducible demo data ([`SineSequence`]), ambient
//! randomness ([`ThreadRandom`]) and fixed sequences in tests (any
//! `FnMut() -> f64`).

use rand::Rng;

use super::config::{conversion_rate, Metrics, Test, TestStatus};
use super::round2;
use crate::error::{Result, TestError};

/// Seed stride used for demo tests: variant `i` is seeded with `i * 1000`.
pub const DEFAULT_SEED_STRIDE: i64 = 1000;

/// Source of uniform values in `[0.0, 1.0)`.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;
}

impl<F: FnMut() -> f64> RandomSource for F {
    fn next_f64(&mut self) -> f64 {
        self()
    }
}

/// Deterministic sine-based sequence: `frac(sin(seed) * 10000)`, then the
/// seed advances by one. Cheap and reproducible, not statistically strong.
#[derive(Debug, Clone)]
pub struct SineSequence {
    seed: i64,
}

impl SineSequence {
    pub fn new(seed: i64) -> Self {
        Self { seed }
    }
}

impl RandomSource for SineSequence {
    fn next_f64(&mut self) -> f64 {
        let x = (self.seed as f64).sin() * 10000.0;
        self.seed = self.seed.wrapping_add(1);
        x - x.floor()
    }
}

/// Ambient randomness from the thread-local generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Draws one synthetic metrics record.
///
/// Draw order is fixed (visitors, conversions, bounce rate, time on page,
/// clicks, engagement noise) so a given sequence always maps to the same
/// record.
pub fn simulate_metrics(rng: &mut impl RandomSource) -> Metrics {
    let visitors = (rng.next_f64() * 10000.0).floor() as u64 + 1000;
    let conversions = (rng.next_f64() * visitors as f64 * 0.15).floor() as u64;
    let bounce_rate = round2(rng.next_f64() * 60.0 + 20.0);
    let avg_time_on_page = round2(rng.next_f64() * 180.0 + 30.0);
    let clicks = (rng.next_f64() * visitors as f64 * 0.8).floor() as u64;
    let clicks_per_visitor = clicks as f64 / visitors as f64 * 100.0;
    let engagement_score = round2((clicks_per_visitor + rng.next_f64() * 20.0).min(100.0));

    Metrics {
        visitors,
        conversions,
        conversion_rate: conversion_rate(conversions, visitors),
        bounce_rate,
        avg_time_on_page,
        clicks,
        engagement_score,
    }
}

pub fn simulate_metrics_seeded(seed: i64) -> Metrics {
    simulate_metrics(&mut SineSequence::new(seed))
}

pub fn simulate_metrics_random() -> Metrics {
    simulate_metrics(&mut ThreadRandom)
}

/// Replaces every variant's metrics with seeded synthetic data; variant `i`
/// uses seed `i * seed_stride`. The previous map is discarded, not merged.
pub fn apply_simulated_metrics(test: &Test, seed_stride: i64) -> Result<Test> {
    apply_with(test, |index| {
        simulate_metrics_seeded((index as i64).wrapping_mul(seed_stride))
    })
}

/// Like [`apply_simulated_metrics`] but every variant draws from `rng` in
/// list order.
pub fn apply_simulated_metrics_with(test: &Test, rng: &mut impl RandomSource) -> Result<Test> {
    apply_with(test, |_| simulate_metrics(&mut *rng))
}

fn apply_with(test: &Test, mut draw: impl FnMut(usize) -> Metrics) -> Result<Test> {
    if test.status == TestStatus::Completed {
        return Err(TestError::invalid_status(&test.status, "refresh metrics of"));
    }
    let metrics = test
        .variants
        .iter()
        .enumerate()
        .map(|(index, variant)| (variant.id.clone(), draw(index)))
        .collect();
    tracing::debug!(
        "simulated metrics for {} variants of test {}",
        test.variants.len(),
        test.id
    );
    Ok(Test {
        metrics,
        ..test.clone()
    })
}
