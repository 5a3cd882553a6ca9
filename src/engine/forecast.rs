//! Forecast Engine.
//!
//! `value_adjusted(Y) = trend(Y) + sum of signed effects with effective_year <= Y`.
//! Effects are level shifts: once landed they persist in every later year.
//! Scenario spread is `scenario_fraction` times the absolute size of landed
//! effects that are not literature-backed. Effect sums saturate, so every
//! emitted value is finite.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Datelike;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{EngineError, OutOfRangeValue};
use super::impact::{
    ImpactRow, build_impact_matrix, effects_by_year, landed_effects, saturating_sum,
};
use super::series::extract_series;
use super::store::RecordStore;
use super::trend::{LinearTrend, fit_trend};

pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;
pub const DEFAULT_SCENARIO_FRACTION: f64 = 0.5;
pub const ACCESS_INDICATOR: &str = "ACC_OWNERSHIP";
pub const USAGE_INDICATOR: &str = "USG_DIGITAL_PAY";
pub const USAGE_FALLBACK_INDICATOR: &str = "USG_ACTIVE_RATE";

/// Baseline projection beyond the last observed year.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendMethod {
    /// Least-squares line through the history, with a prediction interval.
    #[default]
    Linear,
    /// Flat at the last observed value. The interval collapses to the forecast.
    Last,
}

impl TrendMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Last => "last",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastConfig {
    pub confidence_level: f64,
    pub scenario_fraction: f64,
    pub apply_events: bool,
    pub trend_method: TrendMethod,
    /// Series substituted when an indicator has no observations of its own.
    pub fallback_indicators: BTreeMap<String, String>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            confidence_level: DEFAULT_CONFIDENCE_LEVEL,
            scenario_fraction: DEFAULT_SCENARIO_FRACTION,
            apply_events: true,
            trend_method: TrendMethod::Linear,
            fallback_indicators: BTreeMap::from([(
                USAGE_INDICATOR.to_string(),
                USAGE_FALLBACK_INDICATOR.to_string(),
            )]),
        }
    }
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "confidence_level must be in (0, 1), got {}",
                    self.confidence_level
                ),
            });
        }
        if !(self.scenario_fraction.is_finite() && self.scenario_fraction >= 0.0) {
            return Err(EngineError::InvalidConfig {
                reason: format!(
                    "scenario_fraction must be a non-negative number, got {}",
                    self.scenario_fraction
                ),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

impl ValueRange {
    pub const PERCENTAGE: ValueRange = ValueRange {
        min: 0.0,
        max: 100.0,
    };
    pub const NON_NEGATIVE: ValueRange = ValueRange {
        min: 0.0,
        max: f64::MAX,
    };

    pub fn for_indicator(store: &RecordStore, indicator_code: &str) -> Self {
        if store.is_percentage_indicator(indicator_code) {
            Self::PERCENTAGE
        } else {
            Self::NON_NEGATIVE
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastRow {
    pub indicator_code: String,
    pub year: i32,
    pub value_baseline: f64,
    pub value_adjusted: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub scenario_optimistic: f64,
    pub scenario_pessimistic: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorForecast {
    pub indicator_code: String,
    /// Differs from `indicator_code` when a fallback series was used.
    pub source_indicator: String,
    pub last_historical_year: i32,
    pub trend: LinearTrend,
    pub value_range: ValueRange,
    pub impact_rows_applied: usize,
    pub rows: Vec<ForecastRow>,
    pub range_warnings: Vec<OutOfRangeValue>,
}

pub fn forecast(
    store: &RecordStore,
    indicator_code: &str,
    forecast_years: &[i32],
    config: &ForecastConfig,
) -> Result<IndicatorForecast, EngineError> {
    forecast_from_source(store, indicator_code, indicator_code, forecast_years, config)
}

fn forecast_from_source(
    store: &RecordStore,
    indicator_code: &str,
    source_indicator: &str,
    forecast_years: &[i32],
    config: &ForecastConfig,
) -> Result<IndicatorForecast, EngineError> {
    config.validate()?;

    let series = extract_series(store, source_indicator)?;
    let trend = fit_trend(&series)?;
    let last_historical_year = trend.last_year;

    let years = forecast_years
        .iter()
        .copied()
        .collect::<BTreeSet<i32>>();
    if let Some(year) = years.iter().find(|year| **year <= last_historical_year) {
        return Err(EngineError::InvalidForecastYear {
            indicator_code: indicator_code.to_string(),
            year: *year,
            last_historical_year,
        });
    }

    let impact_rows = if config.apply_events {
        build_impact_matrix(store)?
            .into_iter()
            .filter(|row| row.related_indicator == indicator_code)
            .collect::<Vec<ImpactRow>>()
    } else {
        Vec::new()
    };

    let collapsed_interval = match config.trend_method {
        TrendMethod::Linear => trend.residual_std_error.is_none(),
        TrendMethod::Last => false,
    };
    if collapsed_interval {
        warn!(
            indicator = %indicator_code,
            observations = trend.observations,
            "too few observations for a prediction interval; interval collapses to the forecast"
        );
    }
    debug!(
        indicator = %indicator_code,
        source = %source_indicator,
        trend_method = config.trend_method.as_str(),
        slope = trend.slope,
        intercept = trend.intercept,
        impact_rows = impact_rows.len(),
        "fitted baseline trend"
    );

    let value_range = ValueRange::for_indicator(store, source_indicator);
    let by_year = effects_by_year(&impact_rows, indicator_code);
    let mut rows = Vec::with_capacity(years.len());
    let mut range_warnings = Vec::new();

    for year in years {
        let landed = landed_effects(&by_year, year);
        let scenario_bonus = if config.scenario_fraction == 0.0 {
            0.0
        } else {
            (config.scenario_fraction * landed.uncertain_magnitude).min(f64::MAX)
        };

        let value_baseline = match config.trend_method {
            TrendMethod::Linear => trend.value_at(year),
            TrendMethod::Last => trend.last_value,
        };
        let unclamped_adjusted = saturating_sum(value_baseline, landed.signed_effect);
        for (stage, value) in [
            ("value_baseline", value_baseline),
            ("value_adjusted", unclamped_adjusted),
        ] {
            if !value_range.contains(value) {
                let out_of_range = OutOfRangeValue {
                    indicator_code: indicator_code.to_string(),
                    year,
                    stage,
                    value,
                    min: value_range.min,
                    max: value_range.max,
                };
                warn!(warning = %out_of_range, "value clamped to valid range");
                range_warnings.push(out_of_range);
            }
        }

        let value_adjusted = value_range.clamp(unclamped_adjusted);
        let half_width = match config.trend_method {
            TrendMethod::Linear => trend
                .prediction_half_width(year, config.confidence_level)
                .unwrap_or(0.0),
            TrendMethod::Last => 0.0,
        };

        rows.push(ForecastRow {
            indicator_code: indicator_code.to_string(),
            year,
            value_baseline,
            value_adjusted,
            ci_lower: value_range.clamp(value_adjusted - half_width),
            ci_upper: value_range.clamp(value_adjusted + half_width),
            scenario_optimistic: value_range.clamp(value_adjusted + scenario_bonus),
            scenario_pessimistic: value_range.clamp(value_adjusted - scenario_bonus),
        });
    }

    Ok(IndicatorForecast {
        indicator_code: indicator_code.to_string(),
        source_indicator: source_indicator.to_string(),
        last_historical_year,
        trend,
        value_range,
        impact_rows_applied: impact_rows.len(),
        rows,
        range_warnings,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorFailure {
    pub indicator_code: String,
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchForecast {
    pub forecasts: Vec<IndicatorForecast>,
    pub failures: Vec<IndicatorFailure>,
}

/// Forecasts each indicator independently. Per-indicator failures are
/// collected; configuration and integrity errors abort the batch.
pub fn forecast_batch(
    store: &RecordStore,
    indicator_codes: &[String],
    forecast_years: &[i32],
    config: &ForecastConfig,
) -> Result<BatchForecast, EngineError> {
    config.validate()?;

    let mut batch = BatchForecast::default();
    for code in indicator_codes {
        let mut outcome = forecast(store, code, forecast_years, config);

        if let Err(EngineError::MissingIndicator { .. }) = &outcome {
            if let Some(fallback) = config.fallback_indicators.get(code) {
                warn!(
                    indicator = %code,
                    fallback = %fallback,
                    "no observations for indicator; forecasting fallback series"
                );
                outcome = forecast_from_source(store, code, fallback, forecast_years, config);
            }
        }

        match outcome {
            Ok(result) => batch.forecasts.push(result),
            Err(error) if error.is_integrity_error() => return Err(error),
            Err(error) => {
                warn!(indicator = %code, kind = error.kind(), error = %error, "forecast failed");
                batch.failures.push(IndicatorFailure {
                    indicator_code: code.clone(),
                    kind: error.kind(),
                    message: error.to_string(),
                });
            }
        }
    }
    Ok(batch)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetProgress {
    pub target_id: String,
    pub indicator_code: String,
    pub target_year: Option<i32>,
    pub target_value: f64,
    pub forecast_year: i32,
    pub projected_adjusted: f64,
    pub progress_pessimistic: f64,
    pub progress_adjusted: f64,
    pub progress_optimistic: f64,
}

/// Share of each target reached by the forecast, capped to [0, 1]. Uses the
/// row for the target's year, or the last forecast year when not forecast.
pub fn target_progress(store: &RecordStore, forecast: &IndicatorForecast) -> Vec<TargetProgress> {
    let Some(last_row) = forecast.rows.last() else {
        return Vec::new();
    };

    store
        .targets()
        .filter(|(_, target)| target.indicator_code == forecast.indicator_code)
        .map(|(record, target)| {
            let target_year = target.target_date.map(|date| date.year());
            let row = target_year
                .and_then(|year| forecast.rows.iter().find(|row| row.year == year))
                .unwrap_or(last_row);
            let ratio = |value: f64| {
                if target.value_numeric > 0.0 {
                    (value / target.value_numeric).clamp(0.0, 1.0)
                } else {
                    0.0
                }
            };

            TargetProgress {
                target_id: record.record_id.clone(),
                indicator_code: target.indicator_code.clone(),
                target_year,
                target_value: target.value_numeric,
                forecast_year: row.year,
                projected_adjusted: row.value_adjusted,
                progress_pessimistic: ratio(row.scenario_pessimistic),
                progress_adjusted: ratio(row.value_adjusted),
                progress_optimistic: ratio(row.scenario_optimistic),
            }
        })
        .collect()
}
