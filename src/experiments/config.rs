use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::round2;
use crate::error::{Result, TestError};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: TestStatus,
    pub variants: Vec<Variant>,
    pub metrics: IndexMap<String, Metrics>,
    pub traffic_split: IndexMap<String, u32>,
    pub created_at: DateTime<Utc>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub winner_variant_id: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Draft,
    Running,
    Paused,
    Completed,
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestStatus::Draft => "draft",
            TestStatus::Running => "running",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// One candidate version of a page. `config` is the page description produced
/// upstream and is carried through untouched.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Variant {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub config: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied input for one variant at test creation.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct VariantDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl VariantDefinition {
    pub fn new(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            config,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Snapshot of one variant's performance counters.
///
/// Rates are percentages in `[0, 100]`; `avg_time_on_page` is in seconds.
/// `Metrics::default()` is the all-zero record of a variant nobody has seen yet.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub visitors: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    pub bounce_rate: f64,
    pub avg_time_on_page: f64,
    pub clicks: u64,
    pub engagement_score: f64,
}

impl Metrics {
    /// Builds a record from raw analytics counters, deriving conversion rate
    /// and engagement (clicks per visitor as a percentage, capped at 100).
    pub fn from_counts(
        visitors: u64,
        conversions: u64,
        clicks: u64,
        bounce_rate: f64,
        avg_time_on_page: f64,
    ) -> Self {
        let engagement_score = if visitors == 0 {
            0.0
        } else {
            (clicks as f64 / visitors as f64 * 100.0).min(100.0)
        };
        Self {
            visitors,
            conversions,
            conversion_rate: conversion_rate(conversions, visitors),
            bounce_rate: round2(bounce_rate),
            avg_time_on_page: round2(avg_time_on_page),
            clicks,
            engagement_score: round2(engagement_score),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.conversions > self.visitors {
            return Err(TestError::InvalidConfig(format!(
                "conversions ({}) exceed visitors ({})",
                self.conversions, self.visitors
            )));
        }
        for (label, value) in [
            ("conversionRate", self.conversion_rate),
            ("bounceRate", self.bounce_rate),
            ("engagementScore", self.engagement_score),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(TestError::InvalidConfig(format!(
                    "{label} must be within [0, 100], got {value}"
                )));
            }
        }
        let derived = conversion_rate(self.conversions, self.visitors);
        if (self.conversion_rate - derived).abs() > RATE_TOLERANCE {
            return Err(TestError::InvalidConfig(format!(
                "conversionRate {} does not match {}/{} visitors ({})",
                self.conversion_rate, self.conversions, self.visitors, derived
            )));
        }
        if !self.avg_time_on_page.is_finite() || self.avg_time_on_page < 0.0 {
            return Err(TestError::InvalidConfig(format!(
                "avgTimeOnPage must be a non-negative number, got {}",
                self.avg_time_on_page
            )));
        }
        Ok(())
    }
}

/// Slack allowed between a stored conversion rate and the one derived from
/// its counts, to absorb rounding done by other producers.
const RATE_TOLERANCE: f64 = 0.01;

/// Conversions over visitors as a percentage rounded to 2 decimals; 0 when
/// nobody visited.
pub fn conversion_rate(conversions: u64, visitors: u64) -> f64 {
    if visitors == 0 {
        return 0.0;
    }
    round2(conversions as f64 / visitors as f64 * 100.0)
}

/// Equal-as-possible split in whole percent.
///
/// Every variant gets `floor(100 / n)` except the first, which absorbs the
/// remainder so the split always totals exactly 100 (3 variants: 34/33/33).
pub fn allocate_traffic_split(variant_ids: &[String]) -> IndexMap<String, u32> {
    let mut split = IndexMap::with_capacity(variant_ids.len());
    if variant_ids.is_empty() {
        return split;
    }
    let count = variant_ids.len() as u32;
    let base = 100 / count;
    let first = 100 - base * (count - 1);
    for (index, id) in variant_ids.iter().enumerate() {
        split.insert(id.clone(), if index == 0 { first } else { base });
    }
    split
}

/// Creates a `draft` test with zeroed metrics and an equal traffic split.
pub fn create_test(
    name: impl Into<String>,
    description: impl Into<String>,
    definitions: Vec<VariantDefinition>,
) -> Result<Test> {
    create_test_at(name, description, definitions, Utc::now())
}

pub fn create_test_at(
    name: impl Into<String>,
    description: impl Into<String>,
    definitions: Vec<VariantDefinition>,
    now: DateTime<Utc>,
) -> Result<Test> {
    if definitions.len() < 2 {
        return Err(TestError::InvalidVariantCount(definitions.len()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let variants: Vec<Variant> = definitions
        .into_iter()
        .enumerate()
        .map(|(index, def)| Variant {
            id: format!("{}-variant-{}", id, index),
            name: def.name,
            description: def.description,
            config: def.config,
            created_at: now,
        })
        .collect();

    let ids: Vec<String> = variants.iter().map(|v| v.id.clone()).collect();
    let metrics = ids
        .iter()
        .map(|vid| (vid.clone(), Metrics::default()))
        .collect();
    let traffic_split = allocate_traffic_split(&ids);

    let test = Test {
        id,
        name: name.into(),
        description: description.into(),
        status: TestStatus::Draft,
        variants,
        metrics,
        traffic_split,
        created_at: now,
        start_date: None,
        end_date: None,
        winner_variant_id: None,
    };
    tracing::debug!(
        "created test {} with {} variants, split {:?}",
        test.id,
        test.variants.len(),
        test.traffic_split.values().collect::<Vec<_>>()
    );
    Ok(test)
}

impl Test {
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Metrics for a variant, all-zero when none were recorded.
    pub fn metrics_for(&self, variant_id: &str) -> Metrics {
        self.metrics.get(variant_id).copied().unwrap_or_default()
    }

    pub fn variant_ids(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.id.clone()).collect()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let test: Test = serde_json::from_str(json)?;
        test.validate()?;
        Ok(test)
    }

    /// Checks the aggregate's invariants. Meant for tests re-supplied by a
    /// caller's persistence layer; values built by this crate always pass.
    pub fn validate(&self) -> Result<()> {
        if self.variants.len() < 2 {
            return Err(TestError::InvalidVariantCount(self.variants.len()));
        }

        let mut seen = HashSet::with_capacity(self.variants.len());
        for variant in &self.variants {
            if !seen.insert(variant.id.as_str()) {
                return Err(TestError::InvalidConfig(format!(
                    "duplicate variant id: {}",
                    variant.id
                )));
            }
        }

        check_covers_variants("metrics", self.metrics.keys(), &seen)?;
        check_covers_variants("trafficSplit", self.traffic_split.keys(), &seen)?;

        if let Some((variant_id, share)) = self.traffic_split.iter().find(|(_, p)| **p > 100) {
            return Err(TestError::InvalidConfig(format!(
                "trafficSplit for {} is {}%, above 100",
                variant_id, share
            )));
        }
        let total: u64 = self.traffic_split.values().map(|&p| u64::from(p)).sum();
        if total != 100 {
            return Err(TestError::InvalidConfig(format!(
                "trafficSplit must sum to 100, got {}",
                total
            )));
        }

        for (variant_id, metrics) in &self.metrics {
            metrics.validate().map_err(|e| {
                TestError::InvalidConfig(format!("metrics for {}: {}", variant_id, e))
            })?;
        }

        if let Some(winner) = &self.winner_variant_id {
            if !seen.contains(winner.as_str()) {
                return Err(TestError::UnknownVariant(winner.clone()));
            }
            if self.status != TestStatus::Completed {
                return Err(TestError::InvalidConfig(format!(
                    "winnerVariantId is only allowed on completed tests, test is {}",
                    self.status
                )));
            }
        }
        Ok(())
    }
}

fn check_covers_variants<'a>(
    field: &str,
    keys: impl Iterator<Item = &'a String>,
    variant_ids: &HashSet<&str>,
) -> Result<()> {
    let mut count = 0;
    for key in keys {
        if !variant_ids.contains(key.as_str()) {
            return Err(TestError::UnknownVariant(key.clone()));
        }
        count += 1;
    }
    if count != variant_ids.len() {
        return Err(TestError::InvalidConfig(format!(
            "{} has {} entries for {} variants",
            field,
            count,
            variant_ids.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn definitions(count: usize) -> Vec<VariantDefinition> {
        (0..count)
            .map(|i| VariantDefinition::new(format!("Variant {}", i), json!({ "hero": i })))
            .collect()
    }

    fn ids(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("v{}", i)).collect()
    }

    #[test]
    fn split_for_three_variants_gives_remainder_to_first() {
        let split = allocate_traffic_split(&ids(3));
        assert_eq!(split.values().copied().collect::<Vec<_>>(), vec![34, 33, 33]);
    }

    #[test]
    fn split_for_two_variants_is_even() {
        let split = allocate_traffic_split(&ids(2));
        assert_eq!(split.values().copied().collect::<Vec<_>>(), vec![50, 50]);
    }

    #[test]
    fn split_for_seven_variants_sums_to_100() {
        let split = allocate_traffic_split(&ids(7));
        assert_eq!(split.values().sum::<u32>(), 100);
        assert_eq!(split["v0"], 16);
        assert!(split.values().skip(1).all(|&p| p == 14));
    }

    #[test]
    fn split_of_no_variants_is_empty() {
        assert!(allocate_traffic_split(&[]).is_empty());
    }

    #[test]
    fn create_test_derives_variant_ids_in_order() {
        let test = create_test("Hero", "headline copy", definitions(3)).unwrap();
        assert_eq!(test.status, TestStatus::Draft);
        for (index, variant) in test.variants.iter().enumerate() {
            assert_eq!(variant.id, format!("{}-variant-{}", test.id, index));
            assert_eq!(variant.name, format!("Variant {}", index));
        }
    }

    #[test]
    fn create_test_zeroes_metrics_and_passes_config_through() {
        let test = create_test("Hero", "", definitions(2)).unwrap();
        for variant in &test.variants {
            assert_eq!(test.metrics[&variant.id], Metrics::default());
        }
        assert_eq!(test.variants[1].config, json!({ "hero": 1 }));
        assert!(test.start_date.is_none());
        assert!(test.winner_variant_id.is_none());
        assert!(test.validate().is_ok());
    }

    #[test]
    fn create_test_generates_fresh_ids() {
        let a = create_test("a", "", definitions(2)).unwrap();
        let b = create_test("a", "", definitions(2)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn create_test_with_one_variant_is_rejected() {
        let err = create_test("solo", "", definitions(1)).unwrap_err();
        assert!(matches!(err, TestError::InvalidVariantCount(1)));
    }

    #[test]
    fn conversion_rate_is_zero_without_visitors() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(106, 1000), 10.6);
        assert_eq!(conversion_rate(1, 3), 33.33);
    }

    #[test]
    fn metrics_from_counts_caps_engagement() {
        let m = Metrics::from_counts(100, 5, 250, 41.234, 62.0);
        assert_eq!(m.conversion_rate, 5.0);
        assert_eq!(m.engagement_score, 100.0);
        assert_eq!(m.bounce_rate, 41.23);
    }

    #[test]
    fn metrics_with_more_conversions_than_visitors_fail_validation() {
        let m = Metrics {
            visitors: 10,
            conversions: 11,
            ..Default::default()
        };
        assert!(matches!(m.validate(), Err(TestError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_split_not_summing_to_100() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        let first = test.variants[0].id.clone();
        test.traffic_split[&first] = 40;
        assert!(matches!(test.validate(), Err(TestError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_split_share_above_100() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        let (first, second) = (test.variants[0].id.clone(), test.variants[1].id.clone());
        test.traffic_split[&first] = 150;
        test.traffic_split[&second] = 0;
        assert!(matches!(test.validate(), Err(TestError::InvalidConfig(_))));
    }

    #[test]
    fn from_json_rejects_split_that_wraps_u32() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        let (first, second) = (test.variants[0].id.clone(), test.variants[1].id.clone());
        test.traffic_split[&first] = u32::MAX;
        test.traffic_split[&second] = 101;
        let json = serde_json::to_string(&test).unwrap();
        assert!(matches!(
            Test::from_json(&json),
            Err(TestError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_duplicate_variant_ids() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        let first_id = test.variants[0].id.clone();
        test.variants[1].id = first_id;
        let err = test.validate().unwrap_err();
        assert!(matches!(err, TestError::InvalidConfig(ref msg) if msg.contains("duplicate")));
    }

    #[test]
    fn metrics_with_rate_not_matching_counts_fail_validation() {
        let unvisited = Metrics {
            conversion_rate: 50.0,
            ..Default::default()
        };
        assert!(matches!(unvisited.validate(), Err(TestError::InvalidConfig(_))));

        let inflated = Metrics {
            conversion_rate: 20.0,
            ..Metrics::from_counts(1000, 100, 0, 40.0, 60.0)
        };
        assert!(inflated.validate().is_err());
    }

    #[test]
    fn metrics_rate_within_rounding_passes_validation() {
        let m = Metrics {
            conversion_rate: 33.334,
            ..Metrics::from_counts(3, 1, 0, 40.0, 60.0)
        };
        assert!(m.validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_metrics_entry() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        let last = test.variants[1].id.clone();
        test.metrics.shift_remove(&last);
        assert!(matches!(test.validate(), Err(TestError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_extra_split_entry() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        test.traffic_split.insert("ghost".to_string(), 0);
        assert!(matches!(test.validate(), Err(TestError::UnknownVariant(_))));
    }

    #[test]
    fn validate_rejects_winner_on_running_test() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        test.status = TestStatus::Running;
        test.winner_variant_id = Some(test.variants[0].id.clone());
        assert!(matches!(test.validate(), Err(TestError::InvalidConfig(_))));
    }

    #[test]
    fn validate_rejects_unknown_winner() {
        let mut test = create_test("t", "", definitions(2)).unwrap();
        test.status = TestStatus::Completed;
        test.winner_variant_id = Some("nope".to_string());
        assert!(matches!(test.validate(), Err(TestError::UnknownVariant(_))));
    }

    #[test]
    fn test_serializes_to_camel_case() {
        let test = create_test("t", "", definitions(2)).unwrap();
        let json = serde_json::to_string(&test).unwrap();
        assert!(json.contains("\"trafficSplit\""));
        assert!(json.contains("\"winnerVariantId\""));
        assert!(json.contains("\"conversionRate\""));
        assert!(json.contains("\"status\":\"draft\""));
        assert!(!json.contains("traffic_split"));
    }

    #[test]
    fn from_json_validates() {
        let test = create_test("t", "", definitions(2)).unwrap();
        let json = serde_json::to_string(&test).unwrap();
        let back = Test::from_json(&json).unwrap();
        assert_eq!(back, test);

        let mut broken = test.clone();
        broken.variants.pop();
        let json = serde_json::to_string(&broken).unwrap();
        assert!(Test::from_json(&json).is_err());
    }

    #[test]
    fn metrics_for_unknown_variant_is_zeroed() {
        let test = create_test("t", "", definitions(2)).unwrap();
        assert_eq!(test.metrics_for("missing"), Metrics::default());
    }

    #[test]
    fn status_displays_lowercase() {
        assert_eq!(TestStatus::Paused.to_string(), "paused");
        assert_eq!(
            serde_json::to_string(&TestStatus::Completed).unwrap(),
            "\"completed\""
        );
    }
}
