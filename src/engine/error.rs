use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("schema violation in record '{record_id}': {reason}")]
    SchemaViolation { record_id: String, reason: String },

    #[error("impact link '{impact_link_id}' has dangling parent '{parent_id}': {reason}")]
    DanglingImpactLink {
        impact_link_id: String,
        parent_id: String,
        reason: String,
    },

    #[error("no observations found for indicator '{indicator_code}'")]
    MissingIndicator { indicator_code: String },

    #[error(
        "indicator '{indicator_code}' has {distinct_years} distinct year(s); at least 2 are required for a trend fit"
    )]
    InsufficientData {
        indicator_code: String,
        distinct_years: usize,
    },

    #[error(
        "forecast year {year} for indicator '{indicator_code}' is not after the last historical year {last_historical_year}"
    )]
    InvalidForecastYear {
        indicator_code: String,
        year: i32,
        last_historical_year: i32,
    },

    #[error(transparent)]
    OutOfRangeValue(#[from] OutOfRangeValue),

    #[error("invalid forecast configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SchemaViolation { .. } => "schema_violation",
            Self::DanglingImpactLink { .. } => "dangling_impact_link",
            Self::MissingIndicator { .. } => "missing_indicator",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::InvalidForecastYear { .. } => "invalid_forecast_year",
            Self::OutOfRangeValue(_) => "out_of_range_value",
            Self::InvalidConfig { .. } => "invalid_config",
        }
    }

    /// Schema and linkage problems invalidate the whole store; everything else
    /// is scoped to a single indicator.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            Self::SchemaViolation { .. } | Self::DanglingImpactLink { .. }
        )
    }

    pub(crate) fn schema(record_id: &str, reason: impl Into<String>) -> Self {
        Self::SchemaViolation {
            record_id: record_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// A value that left its valid range before clamping. Never fatal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutOfRangeValue {
    pub indicator_code: String,
    pub year: i32,
    pub stage: &'static str,
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl fmt::Display for OutOfRangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} value {:.3} for '{}' in {} is outside [{}, {}]",
            self.stage, self.value, self.indicator_code, self.year, self.min, self.max
        )
    }
}

impl std::error::Error for OutOfRangeValue {}
