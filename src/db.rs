use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use crate::engine::{ForecastRow, IndicatorForecast, RecordRow};

pub const DB_SCHEMA_VERSION: &str = "1";

const RECORD_COLUMNS: &str = "record_id, record_type, category, pillar, indicator, indicator_code, \
     value_numeric, value_text, value_type, unit, observation_date, source_name, source_type, \
     source_url, confidence, parent_id, related_indicator, relationship_type, impact_direction, \
     impact_magnitude, impact_estimate, lag_months, evidence_basis, comparable_country, location, \
     gender, original_text, collected_by, collection_date, notes";

const FORECAST_COLUMNS: &str = "indicator_code, year, value_baseline, value_adjusted, ci_lower, \
     ci_upper, scenario_optimistic, scenario_pessimistic";

pub fn open_read_write(db_path: &Path) -> Result<Connection> {
    let connection = Connection::open(db_path)
        .with_context(|| format!("failed to open database: {}", db_path.display()))?;
    configure_connection(&connection)?;
    Ok(connection)
}

pub fn open_read_only(db_path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database read-only: {}", db_path.display()))
}

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection, updated_at: &str) -> Result<()> {
    connection
        .execute_batch(
            "
            CREATE TABLE IF NOT EXISTS metadata (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS records (
              load_order INTEGER NOT NULL,
              record_id TEXT PRIMARY KEY,
              record_type TEXT NOT NULL,
              category TEXT,
              pillar TEXT,
              indicator TEXT,
              indicator_code TEXT,
              value_numeric REAL,
              value_text TEXT,
              value_type TEXT,
              unit TEXT,
              observation_date TEXT,
              source_name TEXT,
              source_type TEXT,
              source_url TEXT,
              confidence TEXT,
              parent_id TEXT,
              related_indicator TEXT,
              relationship_type TEXT,
              impact_direction TEXT,
              impact_magnitude TEXT,
              impact_estimate REAL,
              lag_months INTEGER,
              evidence_basis TEXT,
              comparable_country TEXT,
              location TEXT,
              gender TEXT,
              original_text TEXT,
              collected_by TEXT,
              collection_date TEXT,
              notes TEXT
            );

            CREATE TABLE IF NOT EXISTS forecasts (
              run_id TEXT NOT NULL,
              indicator_code TEXT NOT NULL,
              source_indicator TEXT NOT NULL,
              year INTEGER NOT NULL,
              value_baseline REAL NOT NULL,
              value_adjusted REAL NOT NULL,
              ci_lower REAL NOT NULL,
              ci_upper REAL NOT NULL,
              scenario_optimistic REAL NOT NULL,
              scenario_pessimistic REAL NOT NULL,
              generated_at TEXT NOT NULL,
              PRIMARY KEY (run_id, indicator_code, year)
            );

            CREATE INDEX IF NOT EXISTS idx_records_type ON records(record_type);
            CREATE INDEX IF NOT EXISTS idx_records_indicator ON records(indicator_code);
            CREATE INDEX IF NOT EXISTS idx_records_parent ON records(parent_id);
            CREATE INDEX IF NOT EXISTS idx_forecasts_indicator ON forecasts(indicator_code, year);
            ",
        )
        .context("failed to initialize database schema")?;

    set_metadata(connection, "db_schema_version", DB_SCHEMA_VERSION)?;
    set_metadata(connection, "db_updated_at", updated_at)?;
    Ok(())
}

pub fn set_metadata(connection: &Connection, key: &str, value: &str) -> Result<()> {
    connection
        .execute(
            "INSERT INTO metadata(key, value) VALUES(?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            [key, value],
        )
        .with_context(|| format!("failed to write metadata key {key}"))?;
    Ok(())
}

pub fn read_metadata(connection: &Connection, key: &str) -> Result<Option<String>> {
    connection
        .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
            row.get(0)
        })
        .optional()
        .with_context(|| format!("failed to read metadata key {key}"))
}

/// Replaces the stored record table. Row order is preserved through
/// `load_order` so later rows keep winning duplicate-year ties after a reload.
pub fn replace_records(connection: &mut Connection, rows: &[RecordRow]) -> Result<usize> {
    let tx = connection.transaction()?;
    tx.execute("DELETE FROM records", [])
        .context("failed to clear records table")?;

    {
        let sql = format!(
            "INSERT INTO records(load_order, {RECORD_COLUMNS})
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                    ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31)"
        );
        let mut statement = tx.prepare(&sql)?;

        for (load_order, row) in rows.iter().enumerate() {
            statement
                .execute(params![
                    load_order as i64,
                    row.record_id,
                    row.record_type,
                    row.category,
                    row.pillar,
                    row.indicator,
                    row.indicator_code,
                    row.value_numeric,
                    row.value_text,
                    row.value_type,
                    row.unit,
                    row.observation_date,
                    row.source_name,
                    row.source_type,
                    row.source_url,
                    row.confidence,
                    row.parent_id,
                    row.related_indicator,
                    row.relationship_type,
                    row.impact_direction,
                    row.impact_magnitude,
                    row.impact_estimate,
                    row.lag_months,
                    row.evidence_basis,
                    row.comparable_country,
                    row.location,
                    row.gender,
                    row.original_text,
                    row.collected_by,
                    row.collection_date,
                    row.notes,
                ])
                .with_context(|| format!("failed to insert record {}", row.record_id))?;
        }
    }

    tx.commit()?;
    Ok(rows.len())
}

pub fn load_record_rows(connection: &Connection) -> Result<Vec<RecordRow>> {
    let sql = format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY load_order ASC");
    let mut statement = connection
        .prepare(&sql)
        .context("failed to prepare records query")?;

    let mut rows = statement.query([])?;
    let mut out = Vec::<RecordRow>::new();
    while let Some(row) = rows.next()? {
        out.push(record_row_from_sql(row)?);
    }
    Ok(out)
}

fn record_row_from_sql(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        record_id: row.get(0)?,
        record_type: row.get(1)?,
        category: row.get(2)?,
        pillar: row.get(3)?,
        indicator: row.get(4)?,
        indicator_code: row.get(5)?,
        value_numeric: row.get(6)?,
        value_text: row.get(7)?,
        value_type: row.get(8)?,
        unit: row.get(9)?,
        observation_date: row.get(10)?,
        source_name: row.get(11)?,
        source_type: row.get(12)?,
        source_url: row.get(13)?,
        confidence: row.get(14)?,
        parent_id: row.get(15)?,
        related_indicator: row.get(16)?,
        relationship_type: row.get(17)?,
        impact_direction: row.get(18)?,
        impact_magnitude: row.get(19)?,
        impact_estimate: row.get(20)?,
        lag_months: row.get(21)?,
        evidence_basis: row.get(22)?,
        comparable_country: row.get(23)?,
        location: row.get(24)?,
        gender: row.get(25)?,
        original_text: row.get(26)?,
        collected_by: row.get(27)?,
        collection_date: row.get(28)?,
        notes: row.get(29)?,
    })
}

pub fn write_forecasts(
    connection: &mut Connection,
    run_id: &str,
    generated_at: &str,
    forecasts: &[IndicatorForecast],
) -> Result<usize> {
    let tx = connection.transaction()?;
    let mut written = 0_usize;

    {
        let mut statement = tx.prepare(
            "
            INSERT INTO forecasts(
              run_id, indicator_code, source_indicator, year, value_baseline, value_adjusted,
              ci_lower, ci_upper, scenario_optimistic, scenario_pessimistic, generated_at
            )
            VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(run_id, indicator_code, year) DO UPDATE SET
              source_indicator=excluded.source_indicator,
              value_baseline=excluded.value_baseline,
              value_adjusted=excluded.value_adjusted,
              ci_lower=excluded.ci_lower,
              ci_upper=excluded.ci_upper,
              scenario_optimistic=excluded.scenario_optimistic,
              scenario_pessimistic=excluded.scenario_pessimistic,
              generated_at=excluded.generated_at
            ",
        )?;

        for forecast in forecasts {
            for row in &forecast.rows {
                statement
                    .execute(params![
                        run_id,
                        row.indicator_code,
                        forecast.source_indicator,
                        row.year,
                        row.value_baseline,
                        row.value_adjusted,
                        row.ci_lower,
                        row.ci_upper,
                        row.scenario_optimistic,
                        row.scenario_pessimistic,
                        generated_at,
                    ])
                    .with_context(|| {
                        format!(
                            "failed to insert forecast row {} {}",
                            row.indicator_code, row.year
                        )
                    })?;
                written += 1;
            }
        }
    }

    tx.commit()?;
    Ok(written)
}

pub fn load_forecast_rows(connection: &Connection, run_id: &str) -> Result<Vec<ForecastRow>> {
    let sql = format!(
        "SELECT {FORECAST_COLUMNS} FROM forecasts WHERE run_id = ?1 ORDER BY indicator_code ASC, year ASC"
    );
    let mut statement = connection
        .prepare(&sql)
        .context("failed to prepare forecasts query")?;

    let mut rows = statement.query([run_id])?;
    let mut out = Vec::<ForecastRow>::new();
    while let Some(row) = rows.next()? {
        out.push(ForecastRow {
            indicator_code: row.get(0)?,
            year: row.get(1)?,
            value_baseline: row.get(2)?,
            value_adjusted: row.get(3)?,
            ci_lower: row.get(4)?,
            ci_upper: row.get(5)?,
            scenario_optimistic: row.get(6)?,
            scenario_pessimistic: row.get(7)?,
        });
    }
    Ok(out)
}

pub fn latest_forecast_run(connection: &Connection) -> Result<Option<String>> {
    connection
        .query_row(
            "SELECT run_id FROM forecasts ORDER BY generated_at DESC, run_id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .context("failed to look up latest forecast run")
}

pub fn record_type_counts(connection: &Connection) -> Result<BTreeMap<String, i64>> {
    let mut statement = connection.prepare(
        "SELECT record_type, COUNT(*) FROM records GROUP BY record_type ORDER BY record_type ASC",
    )?;
    let mut rows = statement.query([])?;
    let mut out = BTreeMap::new();
    while let Some(row) = rows.next()? {
        out.insert(row.get::<_, String>(0)?, row.get::<_, i64>(1)?);
    }
    Ok(out)
}

pub fn query_count(connection: &Connection, sql: &str) -> Result<i64> {
    let count = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(count)
}
