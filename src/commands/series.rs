use std::io::{self, Write};

use anyhow::{Context, Result};
use finclusion::engine::{IndicatorSeries, extract_series, fit_trend};
use serde::Serialize;
use tracing::info;

use crate::cli::SeriesArgs;
use crate::commands::load_store;
use crate::util::{default_db_path, print_json};

#[derive(Debug, Serialize)]
struct SeriesResponse {
    indicator_code: String,
    percentage: bool,
    slope: Option<f64>,
    series: IndicatorSeries,
}

pub fn run(args: SeriesArgs) -> Result<()> {
    let db_path = default_db_path(&args.cache_root, args.db_path.as_ref());
    let store = load_store(&db_path)?;

    let series = extract_series(&store, &args.indicator)
        .with_context(|| format!("failed to extract series for {}", args.indicator))?;
    let slope = fit_trend(&series).ok().map(|trend| trend.slope);
    info!(
        indicator = %args.indicator,
        points = series.points.len(),
        last_year = ?series.last_year(),
        "series extracted"
    );

    let response = SeriesResponse {
        indicator_code: args.indicator.clone(),
        percentage: store.is_percentage_indicator(&args.indicator),
        slope,
        series,
    };

    if args.json {
        return print_json(&response);
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(
        output,
        "Indicator: {} ({})",
        response.indicator_code,
        if response.percentage { "percentage" } else { "level" }
    )?;
    match response.slope {
        Some(slope) => writeln!(output, "Trend: {slope:+.3} per year")?,
        None => writeln!(output, "Trend: n/a (fewer than two years)")?,
    }
    for point in &response.series.points {
        writeln!(output, "{}\t{:.2}", point.year, point.value)?;
    }
    output.flush()?;
    Ok(())
}
