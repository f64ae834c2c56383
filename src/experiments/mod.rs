pub mod comparison;
pub mod config;
pub mod lifecycle;
pub mod simulator;
pub mod stats;
pub mod winner;

/// Rounds to `decimals` places, half away from zero.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

pub(crate) fn round2(value: f64) -> f64 {
    round_to(value, 2)
}
