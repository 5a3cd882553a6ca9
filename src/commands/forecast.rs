use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use finclusion::db;
use finclusion::engine::forecast::{
    ACCESS_INDICATOR, DEFAULT_CONFIDENCE_LEVEL, DEFAULT_SCENARIO_FRACTION, USAGE_INDICATOR,
};
use finclusion::engine::{
    ForecastConfig, IndicatorFailure, IndicatorForecast, TargetProgress, TrendMethod,
    forecast_batch, target_progress,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{ForecastArgs, TrendMode};
use crate::commands::load_store;
use crate::model::{ForecastRunManifest, ForecastSummary, MANIFEST_VERSION};
use crate::util::{
    default_db_path, ensure_directory, manifest_dir, now_utc_string, print_json,
    utc_compact_string, write_json_pretty,
};

const SCENARIO_FRACTION_ENV: &str = "FINCLUSION_SCENARIO_FRACTION";
const CONFIDENCE_LEVEL_ENV: &str = "FINCLUSION_CONFIDENCE_LEVEL";
const DEFAULT_FORECAST_YEARS: [i32; 3] = [2025, 2026, 2027];

#[derive(Debug, Serialize)]
struct ForecastResponse<'a> {
    run_id: &'a str,
    config: &'a ForecastConfig,
    forecasts: &'a [IndicatorForecast],
    failures: &'a [IndicatorFailure],
    target_progress: &'a [TargetProgress],
}

pub fn run(args: ForecastArgs) -> Result<()> {
    let started_ts = Utc::now();
    let generated_at = now_utc_string();
    let run_id = format!("forecast-{}", utc_compact_string(started_ts));
    let manifest_dir = manifest_dir(&args.cache_root);
    ensure_directory(&manifest_dir)?;
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "forecast_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = default_db_path(&args.cache_root, args.db_path.as_ref());

    let config = build_config(
        args.confidence_level,
        std::env::var(CONFIDENCE_LEVEL_ENV).ok().as_deref(),
        args.scenario_fraction,
        std::env::var(SCENARIO_FRACTION_ENV).ok().as_deref(),
        !args.no_events,
        trend_method(args.trend_method),
    )?;
    let indicators = if args.indicators.is_empty() {
        vec![ACCESS_INDICATOR.to_string(), USAGE_INDICATOR.to_string()]
    } else {
        args.indicators.clone()
    };
    let mut years = if args.years.is_empty() {
        DEFAULT_FORECAST_YEARS.to_vec()
    } else {
        args.years.clone()
    };
    years.sort_unstable();
    years.dedup();

    info!(
        run_id = %run_id,
        indicators = ?indicators,
        years = ?years,
        confidence_level = config.confidence_level,
        scenario_fraction = config.scenario_fraction,
        apply_events = config.apply_events,
        trend_method = config.trend_method.as_str(),
        "forecast started"
    );

    let store = load_store(&db_path)?;
    let batch = forecast_batch(&store, &indicators, &years, &config)
        .context("forecast batch aborted")?;

    let progress = batch
        .forecasts
        .iter()
        .flat_map(|result| target_progress(&store, result))
        .collect::<Vec<TargetProgress>>();
    for entry in &progress {
        info!(
            target_id = %entry.target_id,
            indicator = %entry.indicator_code,
            forecast_year = entry.forecast_year,
            progress = entry.progress_adjusted,
            "target progress"
        );
    }

    let mut connection = db::open_read_write(&db_path)?;
    db::ensure_schema(&connection, &generated_at)?;
    let rows_written =
        db::write_forecasts(&mut connection, &run_id, &generated_at, &batch.forecasts)?;
    db::set_metadata(&connection, "last_forecast_run_id", &run_id)?;

    let status = match (batch.forecasts.is_empty(), batch.failures.is_empty()) {
        (true, _) => "failed",
        (false, true) => "completed",
        (false, false) => "completed_with_failures",
    };
    let manifest = ForecastRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        status: status.to_string(),
        generated_at,
        db_path: db_path.display().to_string(),
        config: config.clone(),
        forecast_years: years,
        indicators,
        rows_written,
        forecasts: batch.forecasts.iter().map(summarize_forecast).collect(),
        failures: batch.failures.clone(),
        target_progress: progress.clone(),
        range_warnings: batch
            .forecasts
            .iter()
            .flat_map(|result| result.range_warnings.iter().cloned())
            .collect(),
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        status,
        forecasts = batch.forecasts.len(),
        failures = batch.failures.len(),
        rows = rows_written,
        manifest = %manifest_path.display(),
        "forecast completed"
    );

    if batch.forecasts.is_empty() {
        bail!(
            "no indicator could be forecast ({} failure(s)); see {}",
            batch.failures.len(),
            manifest_path.display()
        );
    }
    for failure in &batch.failures {
        warn!(indicator = %failure.indicator_code, kind = failure.kind, "indicator skipped");
    }

    let response = ForecastResponse {
        run_id: &run_id,
        config: &config,
        forecasts: &batch.forecasts,
        failures: &batch.failures,
        target_progress: &progress,
    };
    if args.json {
        return print_json(&response);
    }
    write_text_response(&response)
}

fn build_config(
    flag_confidence_level: Option<f64>,
    env_confidence_level: Option<&str>,
    flag_scenario_fraction: Option<f64>,
    env_scenario_fraction: Option<&str>,
    apply_events: bool,
    trend_method: TrendMethod,
) -> Result<ForecastConfig> {
    let confidence_level = match flag_confidence_level {
        Some(value) => value,
        None => parse_env_number(CONFIDENCE_LEVEL_ENV, env_confidence_level)?
            .unwrap_or(DEFAULT_CONFIDENCE_LEVEL),
    };
    let scenario_fraction = match flag_scenario_fraction {
        Some(value) => value,
        None => parse_env_number(SCENARIO_FRACTION_ENV, env_scenario_fraction)?
            .unwrap_or(DEFAULT_SCENARIO_FRACTION),
    };

    let config = ForecastConfig {
        confidence_level,
        scenario_fraction,
        apply_events,
        trend_method,
        ..ForecastConfig::default()
    };
    config
        .validate()
        .context("invalid forecast configuration")?;
    Ok(config)
}

fn trend_method(mode: TrendMode) -> TrendMethod {
    match mode {
        TrendMode::Linear => TrendMethod::Linear,
        TrendMode::Last => TrendMethod::Last,
    }
}

fn parse_env_number(name: &str, value: Option<&str>) -> Result<Option<f64>> {
    match value.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("{name}={raw} is not a number")),
    }
}

fn summarize_forecast(result: &IndicatorForecast) -> ForecastSummary {
    ForecastSummary {
        indicator_code: result.indicator_code.clone(),
        source_indicator: result.source_indicator.clone(),
        last_historical_year: result.last_historical_year,
        observations: result.trend.observations,
        slope: result.trend.slope,
        intercept: result.trend.intercept,
        residual_std_error: result.trend.residual_std_error,
        impact_rows_applied: result.impact_rows_applied,
        range_warning_count: result.range_warnings.len(),
    }
}

fn write_text_response(response: &ForecastResponse<'_>) -> Result<()> {
    let mut output = io::BufWriter::new(io::stdout().lock());

    writeln!(
        output,
        "Run: {} (trend={} confidence={:.2} scenario_fraction={:.2} events={})",
        response.run_id,
        response.config.trend_method.as_str(),
        response.config.confidence_level,
        response.config.scenario_fraction,
        if response.config.apply_events { "on" } else { "off" },
    )?;

    for result in response.forecasts {
        writeln!(output)?;
        if result.source_indicator == result.indicator_code {
            writeln!(output, "{}", result.indicator_code)?;
        } else {
            writeln!(
                output,
                "{} (trend from {})",
                result.indicator_code, result.source_indicator
            )?;
        }
        writeln!(
            output,
            "  trend {:+.3}/yr through {}, {} impact link(s)",
            result.trend.slope, result.last_historical_year, result.impact_rows_applied
        )?;
        writeln!(
            output,
            "  year\tbaseline\tadjusted\tci_lower\tci_upper\tpessimistic\toptimistic"
        )?;
        for row in &result.rows {
            writeln!(
                output,
                "  {}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}\t{:.2}",
                row.year,
                row.value_baseline,
                row.value_adjusted,
                row.ci_lower,
                row.ci_upper,
                row.scenario_pessimistic,
                row.scenario_optimistic,
            )?;
        }
    }

    if !response.target_progress.is_empty() {
        writeln!(output)?;
        writeln!(output, "Targets")?;
        for entry in response.target_progress {
            writeln!(
                output,
                "  {}\t{} {:.1} by {}\tprojected {:.2} in {}\tprogress {:.0}% ({:.0}%..{:.0}%)",
                entry.target_id,
                entry.indicator_code,
                entry.target_value,
                entry
                    .target_year
                    .map(|year| year.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                entry.projected_adjusted,
                entry.forecast_year,
                entry.progress_adjusted * 100.0,
                entry.progress_pessimistic * 100.0,
                entry.progress_optimistic * 100.0,
            )?;
        }
    }

    if !response.failures.is_empty() {
        writeln!(output)?;
        writeln!(output, "Failures")?;
        for failure in response.failures {
            writeln!(
                output,
                "  {}\t{}\t{}",
                failure.indicator_code, failure.kind, failure.message
            )?;
        }
    }

    output.flush()?;
    Ok(())
}
