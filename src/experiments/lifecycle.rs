//! Status transitions for a [`Test`].
//!
//! ```text
//! draft ──start──▶ running ──complete──▶ completed
//!                   │    ▲
//!              pause│    │resume
//!                   ▼    │
//!                  paused ──complete──▶ completed
//! ```
//!
//! Every transition takes the current value and returns a new one; the input
//! is never modified. Completion is final.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use super::config::{Metrics, Test, TestStatus};
use super::winner::determine_winner;
use crate::error::{Result, TestError};

pub fn start_test(test: &Test) -> Result<Test> {
    start_test_at(test, Utc::now())
}

/// `draft → running`, stamping `start_date`. Nothing else changes.
pub fn start_test_at(test: &Test, now: DateTime<Utc>) -> Result<Test> {
    if test.status != TestStatus::Draft {
        return Err(TestError::invalid_status(&test.status, "start"));
    }
    tracing::info!("starting test {} ({})", test.id, test.name);
    Ok(Test {
        status: TestStatus::Running,
        start_date: Some(now),
        ..test.clone()
    })
}

/// `running → paused`. The start date is kept and metrics may still be
/// replaced while paused.
pub fn pause_test(test: &Test) -> Result<Test> {
    if test.status != TestStatus::Running {
        return Err(TestError::invalid_status(&test.status, "pause"));
    }
    tracing::info!("pausing test {}", test.id);
    Ok(Test {
        status: TestStatus::Paused,
        ..test.clone()
    })
}

/// `paused → running`, keeping the original start date.
pub fn resume_test(test: &Test) -> Result<Test> {
    if test.status != TestStatus::Paused {
        return Err(TestError::invalid_status(&test.status, "resume"));
    }
    tracing::info!("resuming test {}", test.id);
    Ok(Test {
        status: TestStatus::Running,
        ..test.clone()
    })
}

pub fn complete_test(test: &Test) -> Result<Test> {
    complete_test_at(test, Utc::now())
}

/// `running | paused → completed`: stamps `end_date` and stores the winner
/// picked from the current metrics (left unset when there is none).
pub fn complete_test_at(test: &Test, now: DateTime<Utc>) -> Result<Test> {
    if test.status != TestStatus::Running && test.status != TestStatus::Paused {
        return Err(TestError::invalid_status(&test.status, "complete"));
    }
    let winner = determine_winner(test);
    match &winner {
        Some(w) => tracing::info!(
            "completing test {}: winner {} at {}% confidence (significant: {})",
            test.id,
            w.winner_id,
            w.confidence,
            w.significant
        ),
        None => tracing::warn!("completing test {} without a winner", test.id),
    }
    Ok(Test {
        status: TestStatus::Completed,
        end_date: Some(now),
        winner_variant_id: winner.map(|w| w.winner_id),
        ..test.clone()
    })
}

/// Replaces the whole metrics map with a snapshot from an analytics feed.
///
/// The snapshot must hold exactly one valid record per variant. Completed
/// tests are frozen.
pub fn record_metrics(test: &Test, snapshot: IndexMap<String, Metrics>) -> Result<Test> {
    if test.status == TestStatus::Completed {
        return Err(TestError::invalid_status(&test.status, "record metrics for"));
    }
    if let Some(unknown) = snapshot.keys().find(|id| test.variant(id).is_none()) {
        return Err(TestError::UnknownVariant(unknown.clone()));
    }
    if let Some(missing) = test.variants.iter().find(|v| !snapshot.contains_key(&v.id)) {
        return Err(TestError::InvalidConfig(format!(
            "metrics snapshot is missing variant {}",
            missing.id
        )));
    }
    for (variant_id, metrics) in &snapshot {
        metrics.validate().map_err(|e| {
            TestError::InvalidConfig(format!("metrics for {}: {}", variant_id, e))
        })?;
    }

    // keep variant order regardless of how the feed ordered its keys
    let metrics = test
        .variants
        .iter()
        .filter_map(|v| snapshot.get(&v.id).map(|m| (v.id.clone(), *m)))
        .collect();
    tracing::debug!("recorded metrics snapshot for test {}", test.id);
    Ok(Test {
        metrics,
        ..test.clone()
    })
}
