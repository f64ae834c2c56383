use serde::{Deserialize, Serialize};

use super::config::{Test, Variant};
use super::round2;
use super::stats::two_proportion_z_test;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WinnerResult {
    pub winner_id: String,
    /// Best of the remaining variants; `None` for single-variant tests.
    pub runner_up_id: Option<String>,
    pub p_value: f64,
    /// `(1 - p_value) * 100`, rounded to 2 decimals.
    pub confidence: f64,
    pub significant: bool,
}

/// Picks the variant with the highest conversion rate and tests it against
/// the runner-up.
///
/// Comparison is strict, so on a tie the variant listed first wins. A test
/// with a single variant trivially returns it at 100% confidence; a test
/// with no variants has no winner.
pub fn determine_winner(test: &Test) -> Option<WinnerResult> {
    let (winner_index, winner) = best_by_conversion_rate(test, None)?;

    let Some((_, runner_up)) = best_by_conversion_rate(test, Some(winner_index)) else {
        return Some(WinnerResult {
            winner_id: winner.id.clone(),
            runner_up_id: None,
            p_value: 0.0,
            confidence: 100.0,
            significant: true,
        });
    };

    let result = two_proportion_z_test(
        &test.metrics_for(&winner.id),
        &test.metrics_for(&runner_up.id),
    );
    let confidence = round2((1.0 - result.p_value) * 100.0);
    let significant = result.significant();

    tracing::debug!(
        "test {}: winner {} vs runner-up {} z={:.4} p={} confidence={}",
        test.id,
        winner.id,
        runner_up.id,
        result.z_score,
        result.p_value,
        confidence
    );

    Some(WinnerResult {
        winner_id: winner.id.clone(),
        runner_up_id: Some(runner_up.id.clone()),
        p_value: result.p_value,
        confidence,
        significant,
    })
}

/// First variant (in list order) holding the strictly highest conversion
/// rate, optionally skipping one index.
fn best_by_conversion_rate(test: &Test, skip: Option<usize>) -> Option<(usize, &Variant)> {
    let mut best: Option<(usize, &Variant, f64)> = None;
    for (index, variant) in test.variants.iter().enumerate() {
        if Some(index) == skip {
            continue;
        }
        let rate = test.metrics_for(&variant.id).conversion_rate;
        match best {
            Some((_, _, best_rate)) if rate <= best_rate => {}
            _ => best = Some((index, variant, rate)),
        }
    }
    best.map(|(index, variant, _)| (index, variant))
}
