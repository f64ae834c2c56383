use thiserror::Error;

use crate::experiments::config::TestStatus;

#[derive(Error, Debug)]
pub enum TestError {
    #[error("A test needs at least 2 variants, got {0}")]
    InvalidVariantCount(usize),

    #[error("Baseline variant not found: {0}")]
    UnknownBaselineVariant(String),

    #[error("Variant not found: {0}")]
    UnknownVariant(String),

    #[error("Cannot {action} a test that is {status}")]
    InvalidStatus {
        status: TestStatus,
        action: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TestError>;

impl TestError {
    /// Stable machine-readable kind, for callers that map errors onto their own
    /// response codes.
    pub fn kind(&self) -> &'static str {
        match self {
            TestError::InvalidVariantCount(_) => "InvalidVariantCount",
            TestError::UnknownBaselineVariant(_) => "UnknownBaselineVariant",
            TestError::UnknownVariant(_) => "UnknownVariant",
            TestError::InvalidStatus { .. } => "InvalidStatus",
            TestError::InvalidConfig(_) => "InvalidConfig",
            TestError::Json(_) => "Json",
        }
    }

    pub(crate) fn invalid_status(status: &TestStatus, action: &'static str) -> Self {
        TestError::InvalidStatus {
            status: status.clone(),
            action,
        }
    }
}
