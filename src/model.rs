use std::collections::BTreeMap;

use finclusion::engine::{
    EnrichmentVerification, Finding, ForecastConfig, IndicatorFailure, OutOfRangeValue,
    TargetProgress,
};
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct SourceFile {
    pub role: String,
    pub path: String,
    pub sha256: String,
    pub row_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub db_path: String,
    pub sources: Vec<SourceFile>,
    pub records_written: usize,
    pub record_type_counts: BTreeMap<String, usize>,
    pub temporal_coverage: BTreeMap<String, Vec<i32>>,
    pub findings: Vec<Finding>,
    pub enrichment: Option<EnrichmentVerification>,
}

/// Fields shared by every manifest; enough for `status` to summarize a run.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestHeader {
    pub run_id: Option<String>,
    pub status: Option<String>,
    pub updated_at: Option<String>,
    pub generated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityCheck {
    pub check_id: String,
    pub name: String,
    pub result: String,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckSummary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
    pub warning: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViolationEntry {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub db_path: String,
    pub status: String,
    pub summary: CheckSummary,
    pub checks: Vec<QualityCheck>,
    pub violations: Vec<ViolationEntry>,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastSummary {
    pub indicator_code: String,
    pub source_indicator: String,
    pub last_historical_year: i32,
    pub observations: usize,
    pub slope: f64,
    pub intercept: f64,
    pub residual_std_error: Option<f64>,
    pub impact_rows_applied: usize,
    pub range_warning_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub generated_at: String,
    pub db_path: String,
    pub config: ForecastConfig,
    pub forecast_years: Vec<i32>,
    pub indicators: Vec<String>,
    pub rows_written: usize,
    pub forecasts: Vec<ForecastSummary>,
    pub failures: Vec<IndicatorFailure>,
    pub target_progress: Vec<TargetProgress>,
    pub range_warnings: Vec<OutOfRangeValue>,
}
