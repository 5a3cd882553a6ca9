use std::path::Path;

use anyhow::Result;
use finclusion::db;
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::latest_manifest;
use crate::model::ManifestHeader;
use crate::util::{default_db_path, manifest_dir, read_json_file};

const MANIFEST_KINDS: [(&str, &str); 3] = [
    ("ingest", "ingest_run_"),
    ("validate", "validation_report_"),
    ("forecast", "forecast_run_"),
];

pub fn run(args: StatusArgs) -> Result<()> {
    let manifest_dir = manifest_dir(&args.cache_root);
    let db_path = default_db_path(&args.cache_root, args.db_path.as_ref());

    info!(cache_root = %args.cache_root.display(), "status requested");

    for (kind, prefix) in MANIFEST_KINDS {
        report_latest_manifest(&manifest_dir, kind, prefix)?;
    }

    if !db_path.exists() {
        warn!(path = %db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = db::open_read_only(&db_path)?;
    let schema_version = db::read_metadata(&connection, "db_schema_version")
        .ok()
        .flatten()
        .unwrap_or_default();
    let records = db::query_count(&connection, "SELECT COUNT(*) FROM records").unwrap_or(0);
    let forecast_rows = db::query_count(&connection, "SELECT COUNT(*) FROM forecasts").unwrap_or(0);
    let latest_run = db::latest_forecast_run(&connection).ok().flatten();

    info!(
        path = %db_path.display(),
        schema_version = %schema_version,
        records,
        forecast_rows,
        latest_forecast_run = %latest_run.as_deref().unwrap_or_default(),
        "database status"
    );

    for (record_type, count) in db::record_type_counts(&connection)? {
        info!(record_type = %record_type, count, "records by type");
    }

    let indicators = db::query_count(
        &connection,
        "SELECT COUNT(DISTINCT indicator_code) FROM records WHERE record_type = 'observation'",
    )
    .unwrap_or(0);
    let mut statement = connection.prepare(
        "
        SELECT indicator_code, COUNT(*), MIN(substr(observation_date, 1, 4)), MAX(substr(observation_date, 1, 4))
        FROM records
        WHERE record_type = 'observation' AND indicator_code IS NOT NULL
        GROUP BY indicator_code
        ORDER BY indicator_code ASC
        ",
    )?;
    let mut rows = statement.query([])?;
    while let Some(row) = rows.next()? {
        let code: String = row.get(0)?;
        let observations: i64 = row.get(1)?;
        let first_year: Option<String> = row.get(2)?;
        let last_year: Option<String> = row.get(3)?;
        info!(
            indicator = %code,
            observations,
            first_year = %first_year.unwrap_or_default(),
            last_year = %last_year.unwrap_or_default(),
            "indicator coverage"
        );
    }
    info!(indicators, "observed indicators");

    if let Some(run_id) = latest_run {
        for row in db::load_forecast_rows(&connection, &run_id)? {
            info!(
                run_id = %run_id,
                indicator = %row.indicator_code,
                year = row.year,
                adjusted = row.value_adjusted,
                pessimistic = row.scenario_pessimistic,
                optimistic = row.scenario_optimistic,
                "latest forecast"
            );
        }
    }

    Ok(())
}

fn report_latest_manifest(manifest_dir: &Path, kind: &str, prefix: &str) -> Result<()> {
    let Some(path) = latest_manifest(manifest_dir, prefix)? else {
        warn!(kind, dir = %manifest_dir.display(), "no manifest found");
        return Ok(());
    };

    let header: ManifestHeader = read_json_file(&path)?;
    info!(
        kind,
        path = %path.display(),
        run_id = %header.run_id.unwrap_or_default(),
        status = %header.status.unwrap_or_default(),
        updated_at = %header.updated_at.or(header.generated_at).unwrap_or_default(),
        "latest manifest"
    );
    Ok(())
}
