use serde::{Deserialize, Serialize};

use super::config::{Metrics, Test};
use super::round_to;

/// p-value below which a difference counts as significant (95% confidence).
pub const SIGNIFICANCE_THRESHOLD: f64 = 0.05;

/// p-value below which observed traffic is flagged as not matching the
/// intended split.
pub const SRM_THRESHOLD: f64 = 0.01;

// ── Result Structs ──────────────────────────────────────────────────

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZTestResult {
    pub z_score: f64,
    /// Rounded to 4 decimals.
    pub p_value: f64,
}

impl ZTestResult {
    fn inconclusive() -> Self {
        Self {
            z_score: 0.0,
            p_value: 1.0,
        }
    }

    pub fn significant(&self) -> bool {
        self.p_value < SIGNIFICANCE_THRESHOLD
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SrmCheck {
    pub chi_squared: f64,
    pub degrees_of_freedom: u32,
    pub p_value: f64,
    pub mismatch: bool,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SampleSizeEstimate {
    pub per_variant: u64,
    pub total: u64,
}

// ── Two-Proportion Z-Test ───────────────────────────────────────────

/// p-value for the difference in conversion rate between two variants.
///
/// See [`two_proportion_z_test`]; this is its `p_value`.
pub fn calculate_significance(a: &Metrics, b: &Metrics) -> f64 {
    two_proportion_z_test(a, b).p_value
}

/// Pooled two-proportion z-test on conversion rate, visitors as trials.
///
/// The p-value uses the closed form `exp(-0.717 z - 0.416 z^2)`, a tail
/// approximation that is good enough for a 0.05 decision threshold.
/// Zero visitors on either side, or a zero standard error, yield the neutral
/// result `p = 1.0`.
pub fn two_proportion_z_test(a: &Metrics, b: &Metrics) -> ZTestResult {
    if a.visitors == 0 || b.visitors == 0 {
        tracing::warn!(
            "significance requested with zero visitors ({} vs {}), reporting p=1.0",
            a.visitors,
            b.visitors
        );
        return ZTestResult::inconclusive();
    }

    let n1 = a.visitors as f64;
    let n2 = b.visitors as f64;
    let p1 = a.conversion_rate / 100.0;
    let p2 = b.conversion_rate / 100.0;

    let pooled = (p1 * n1 + p2 * n2) / (n1 + n2);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 || !se.is_finite() {
        return ZTestResult::inconclusive();
    }

    let z = (p1 - p2).abs() / se;
    let p_value = (-0.717 * z - 0.416 * z * z).exp();
    ZTestResult {
        z_score: z,
        p_value: round_to(p_value, 4),
    }
}

// ── Normal Survival Function (A&S 26.2.17 with Horner's method) ─────

/// Computes P(Z > z) for the standard normal distribution.
/// Caller must pass z >= 0.
pub fn normal_sf(z: f64) -> f64 {
    debug_assert!(z >= 0.0, "normal_sf requires z >= 0, got {}", z);

    let t = 1.0 / (1.0 + 0.2316419 * z);
    let d = 0.3989422804014327; // 1/sqrt(2*pi)
    let p = d * (-z * z / 2.0).exp();

    let poly = t
        * (0.319381530
            + t * (-0.356563782 + t * (1.781477937 + t * (-1.821255978 + t * 1.330274429))));

    p * poly
}

fn normal_cdf_upper(z: f64) -> f64 {
    if z >= 0.0 {
        normal_sf(z)
    } else {
        1.0 - normal_sf(-z)
    }
}

// ── SRM Detection ───────────────────────────────────────────────────

/// Chi-squared goodness-of-fit of observed visitors against the intended
/// traffic split. Flags a mismatch when p < 0.01.
///
/// Variants with a 0% allocation that still received visitors are a mismatch
/// outright; with no visitors at all there is nothing to check.
pub fn check_sample_ratio_mismatch(test: &Test) -> SrmCheck {
    let observed: Vec<(f64, f64)> = test
        .variants
        .iter()
        .map(|v| {
            let visitors = test.metrics_for(&v.id).visitors as f64;
            let share = test.traffic_split.get(&v.id).copied().unwrap_or(0) as f64 / 100.0;
            (visitors, share)
        })
        .collect();

    let total: f64 = observed.iter().map(|(n, _)| n).sum();
    if total == 0.0 {
        return SrmCheck {
            chi_squared: 0.0,
            degrees_of_freedom: 0,
            p_value: 1.0,
            mismatch: false,
        };
    }

    let mut chi2 = 0.0;
    let mut buckets = 0u32;
    for &(visitors, share) in &observed {
        let expected = total * share;
        if expected == 0.0 {
            if visitors > 0.0 {
                tracing::warn!("test {}: traffic reached a variant with a 0% allocation", test.id);
                return SrmCheck {
                    chi_squared: f64::INFINITY,
                    degrees_of_freedom: 0,
                    p_value: 0.0,
                    mismatch: true,
                };
            }
            continue;
        }
        chi2 += (visitors - expected).powi(2) / expected;
        buckets += 1;
    }

    let df = buckets.saturating_sub(1);
    let p_value = chi_squared_sf(chi2, df);
    let mismatch = p_value < SRM_THRESHOLD;
    if mismatch {
        tracing::warn!(
            "test {}: sample ratio mismatch, chi2={:.3} df={} p={:.5}",
            test.id,
            chi2,
            df,
            p_value
        );
    }
    SrmCheck {
        chi_squared: chi2,
        degrees_of_freedom: df,
        p_value,
        mismatch,
    }
}

/// Upper tail of the chi-squared distribution. Exact for 1 and 2 degrees of
/// freedom, Wilson-Hilferty cube-root approximation above that.
fn chi_squared_sf(x: f64, df: u32) -> f64 {
    if df == 0 || x <= 0.0 {
        return 1.0;
    }
    let p = match df {
        1 => 2.0 * normal_sf(x.sqrt()),
        2 => (-x / 2.0).exp(),
        _ => {
            let k = df as f64;
            let z = ((x / k).cbrt() - (1.0 - 2.0 / (9.0 * k))) / (2.0 / (9.0 * k)).sqrt();
            normal_cdf_upper(z)
        }
    };
    p.clamp(0.0, 1.0)
}

// ── Sample Size Estimator ───────────────────────────────────────────

/// Two-proportion power analysis.
///
/// `baseline_rate` is a conversion rate in percent, `relative_mde` the
/// relative lift to detect (0.2 = +20%). Returns visitors needed per variant
/// and in total across `variant_count` variants. An undetectable effect
/// (zero lift, or a lifted rate at or above 100%) needs `u64::MAX`.
pub fn required_sample_size(
    baseline_rate: f64,
    relative_mde: f64,
    alpha: f64,
    power: f64,
    variant_count: usize,
) -> SampleSizeEstimate {
    let p1 = baseline_rate / 100.0;
    let p2 = p1 * (1.0 + relative_mde);
    let delta = (p2 - p1).abs();

    if delta == 0.0 || !(0.0..1.0).contains(&p2) || !(0.0..1.0).contains(&p1) {
        return SampleSizeEstimate {
            per_variant: u64::MAX,
            total: u64::MAX,
        };
    }

    let z_alpha = z_from_p(1.0 - alpha / 2.0);
    let z_power = z_from_p(power);
    let p_bar = (p1 + p2) / 2.0;

    // n = (z_a * sqrt(2 p_bar (1 - p_bar)) + z_b * sqrt(p1 (1 - p1) + p2 (1 - p2)))^2 / delta^2
    let numerator = z_alpha * (2.0 * p_bar * (1.0 - p_bar)).sqrt()
        + z_power * (p1 * (1.0 - p1) + p2 * (1.0 - p2)).sqrt();
    let per_variant = (numerator.powi(2) / delta.powi(2)).ceil() as u64;

    SampleSizeEstimate {
        per_variant,
        total: per_variant.saturating_mul(variant_count as u64),
    }
}

/// Inverse normal CDF approximation (A&S 26.2.23).
/// Returns z such that P(Z < z) = p.
fn z_from_p(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let (p_adj, sign) = if p < 0.5 { (p, -1.0) } else { (1.0 - p, 1.0) };
    let t = (-2.0 * p_adj.ln()).sqrt();

    let c0 = 2.515517;
    let c1 = 0.802853;
    let c2 = 0.010328;
    let d1 = 1.432788;
    let d2 = 0.189269;
    let d3 = 0.001308;

    let z = t - (c0 + c1 * t + c2 * t * t) / (1.0 + d1 * t + d2 * t * t + d3 * t * t * t);

    sign * z
}
