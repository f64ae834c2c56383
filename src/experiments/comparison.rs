use serde::{Deserialize, Serialize};

use super::config::{Metrics, Test};
use super::round2;
use crate::error::{Result, TestError};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub enum MetricKind {
    Visitors,
    Conversions,
    ConversionRate,
    BounceRate,
    AvgTimeOnPage,
    Clicks,
    EngagementScore,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Visitors,
        MetricKind::Conversions,
        MetricKind::ConversionRate,
        MetricKind::BounceRate,
        MetricKind::AvgTimeOnPage,
        MetricKind::Clicks,
        MetricKind::EngagementScore,
    ];

    pub fn value(&self, metrics: &Metrics) -> f64 {
        match self {
            MetricKind::Visitors => metrics.visitors as f64,
            MetricKind::Conversions => metrics.conversions as f64,
            MetricKind::ConversionRate => metrics.conversion_rate,
            MetricKind::BounceRate => metrics.bounce_rate,
            MetricKind::AvgTimeOnPage => metrics.avg_time_on_page,
            MetricKind::Clicks => metrics.clicks as f64,
            MetricKind::EngagementScore => metrics.engagement_score,
        }
    }

    /// Bounce rate is the only metric where a drop is an improvement.
    pub fn lower_is_better(&self) -> bool {
        matches!(self, MetricKind::BounceRate)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricKind::Visitors => "visitors",
            MetricKind::Conversions => "conversions",
            MetricKind::ConversionRate => "conversionRate",
            MetricKind::BounceRate => "bounceRate",
            MetricKind::AvgTimeOnPage => "avgTimeOnPage",
            MetricKind::Clicks => "clicks",
            MetricKind::EngagementScore => "engagementScore",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricDelta {
    pub metric: MetricKind,
    pub baseline: f64,
    pub value: f64,
    /// `value - baseline`
    pub difference: f64,
    /// Difference relative to the baseline in percent; 0 when the baseline is 0.
    pub percent_change: f64,
    pub is_better: bool,
}

impl MetricDelta {
    pub fn compute(metric: MetricKind, baseline: &Metrics, variant: &Metrics) -> Self {
        let base = metric.value(baseline);
        let value = metric.value(variant);
        let difference = value - base;
        let percent_change = if base == 0.0 {
            0.0
        } else {
            difference / base * 100.0
        };
        let is_better = if metric.lower_is_better() {
            difference < 0.0
        } else {
            difference > 0.0
        };
        Self {
            metric,
            baseline: round2(base),
            value: round2(value),
            difference: round2(difference),
            percent_change: round2(percent_change),
            is_better,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VariantComparison {
    pub variant_id: String,
    pub variant_name: String,
    pub deltas: Vec<MetricDelta>,
}

impl VariantComparison {
    pub fn delta(&self, metric: MetricKind) -> Option<&MetricDelta> {
        self.deltas.iter().find(|d| d.metric == metric)
    }

    pub fn better_count(&self) -> usize {
        self.deltas.iter().filter(|d| d.is_better).count()
    }
}

/// Compares every non-baseline variant against `baseline_id`, metric by
/// metric, in variant list order.
pub fn compare_variants(test: &Test, baseline_id: &str) -> Result<Vec<VariantComparison>> {
    if test.variant(baseline_id).is_none() {
        return Err(TestError::UnknownBaselineVariant(baseline_id.to_string()));
    }
    let baseline = test.metrics_for(baseline_id);

    Ok(test
        .variants
        .iter()
        .filter(|v| v.id != baseline_id)
        .map(|v| {
            let metrics = test.metrics_for(&v.id);
            VariantComparison {
                variant_id: v.id.clone(),
                variant_name: v.name.clone(),
                deltas: MetricKind::ALL
                    .iter()
                    .map(|&kind| MetricDelta::compute(kind, &baseline, &metrics))
                    .collect(),
            }
        })
        .collect())
}
