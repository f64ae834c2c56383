//! Experiment (A/B test) analysis engine.
//!
//! Builds tests out of variant definitions, allocates the intended traffic
//! split, simulates or ingests per-variant metrics, and picks a winner with a
//! confidence score. Everything here is a pure function of its inputs: the
//! caller persists the [`Test`] values it gets back.

pub mod error;
pub mod experiments;

pub use error::{Result, TestError};
pub use experiments::comparison::{compare_variants, MetricDelta, MetricKind, VariantComparison};
pub use experiments::config::{create_test, Metrics, Test, TestStatus, Variant, VariantDefinition};
pub use experiments::lifecycle::{complete_test, pause_test, record_metrics, resume_test, start_test};
pub use experiments::simulator::{
    apply_simulated_metrics, simulate_metrics, simulate_metrics_seeded, RandomSource, SineSequence,
};
pub use experiments::stats::calculate_significance;
pub use experiments::winner::{determine_winner, WinnerResult};
