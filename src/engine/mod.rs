//! Event-impact attribution and forecasting over a unified record table.
//!
//! Everything here is a pure function of an immutable [`RecordStore`]; the
//! store is `Send + Sync`, so callers may run independent forecasts on
//! separate threads.

pub mod error;
pub mod forecast;
pub mod impact;
pub mod record;
pub mod series;
pub mod store;
pub mod trend;

#[cfg(test)]
mod tests;

pub use error::{EngineError, OutOfRangeValue};
pub use forecast::{
    BatchForecast, ForecastConfig, ForecastRow, IndicatorFailure, IndicatorForecast,
    TargetProgress, TrendMethod, ValueRange, forecast, forecast_batch, target_progress,
};
pub use impact::{
    AssociationCell, AssociationEntry, AssociationMatrix, ImpactRow, YearEffects,
    association_entries, build_event_indicator_association_matrix, build_impact_matrix,
    effective_year, effects_by_year, landed_effects,
};
pub use record::{Record, RecordKind, RecordRow, RecordType};
pub use series::{IndicatorSeries, SeriesPoint, extract_series};
pub use store::{
    EnrichmentVerification, Finding, IntegrityAudit, RecordStore, TimelineEvent, audit_rows,
    verify_enrichment,
};
pub use trend::{LinearTrend, fit_trend};
