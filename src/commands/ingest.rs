use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use finclusion::db;
use finclusion::engine::{RecordRow, RecordStore, verify_enrichment};
use regex::Regex;
use tracing::{info, warn};

use crate::cli::IngestArgs;
use crate::model::{IngestRunManifest, MANIFEST_VERSION, SourceFile};
use crate::util::{
    default_db_path, ensure_directory, manifest_dir, now_utc_string, read_json_file, sha256_file,
    utc_compact_string, write_json_pretty,
};

const INDICATOR_CODE_PATTERN: &str = r"^[A-Z][A-Z0-9_]*$";

pub fn run(args: IngestArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("ingest-{}", utc_compact_string(started_ts));

    let manifest_dir = manifest_dir(&args.cache_root);
    ensure_directory(&manifest_dir)?;
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        manifest_dir.join(format!(
            "ingest_run_{}.json",
            utc_compact_string(started_ts)
        ))
    });
    let db_path = default_db_path(&args.cache_root, args.db_path.as_ref());

    info!(
        run_id = %run_id,
        records = %args.records.display(),
        enrichment = ?args.enrichment.as_ref().map(|path| path.display().to_string()),
        "ingest started"
    );

    let base_rows: Vec<RecordRow> = read_json_file(&args.records)?;
    let mut sources = vec![source_file("records", &args.records, base_rows.len())?];
    reject_malformed_codes(&args.records, &base_rows)?;

    let base = RecordStore::from_rows(&base_rows).with_context(|| {
        format!(
            "record table {} failed integrity checks",
            args.records.display()
        )
    })?;
    info!(records = base.len(), "record table validated");

    let (store, enrichment, all_rows) = match &args.enrichment {
        Some(path) => {
            let enrichment_rows: Vec<RecordRow> = read_json_file(path)?;
            sources.push(source_file("enrichment", path, enrichment_rows.len())?);
            reject_malformed_codes(path, &enrichment_rows)?;

            let enriched = base
                .clone()
                .extend(&enrichment_rows)
                .with_context(|| format!("enrichment batch {} was rejected", path.display()))?;
            let verification = verify_enrichment(&base, &enriched);
            info!(
                added_records = enrichment_rows.len(),
                indicators_added = ?verification.indicators_added,
                years_expanded = ?verification.years_expanded_for_existing_indicators,
                "enrichment applied"
            );

            let mut all_rows = base_rows;
            all_rows.extend(enrichment_rows);
            (enriched, Some(verification), all_rows)
        }
        None => (base, None, base_rows),
    };

    let findings = store.soft_findings();
    for finding in &findings {
        warn!(
            code = finding.code,
            record_id = %finding.record_id.as_deref().unwrap_or_default(),
            indicator = %finding.indicator_code.as_deref().unwrap_or_default(),
            "{}",
            finding.message
        );
    }

    if let Some(parent) = db_path.parent() {
        ensure_directory(parent)?;
    }
    let mut connection = db::open_read_write(&db_path)?;
    db::ensure_schema(&connection, &now_utc_string())?;
    let records_written = db::replace_records(&mut connection, &all_rows)?;
    db::set_metadata(&connection, "last_ingest_run_id", &run_id)?;
    db::set_metadata(&connection, "records_source_sha256", &sources[0].sha256)?;

    let manifest = IngestRunManifest {
        manifest_version: MANIFEST_VERSION,
        run_id: run_id.clone(),
        db_schema_version: db::DB_SCHEMA_VERSION.to_string(),
        status: "completed".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: "ingest".to_string(),
        db_path: db_path.display().to_string(),
        sources,
        records_written,
        record_type_counts: store.record_type_counts(),
        temporal_coverage: store.temporal_coverage(),
        findings,
        enrichment,
    };
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        run_id = %run_id,
        records = records_written,
        findings = manifest.findings.len(),
        db = %db_path.display(),
        manifest = %manifest_path.display(),
        "ingest completed"
    );

    Ok(())
}

fn source_file(role: &str, path: &Path, row_count: usize) -> Result<SourceFile> {
    Ok(SourceFile {
        role: role.to_string(),
        path: path.display().to_string(),
        sha256: sha256_file(path)?,
        row_count,
    })
}

fn reject_malformed_codes(path: &Path, rows: &[RecordRow]) -> Result<()> {
    let malformed = malformed_indicator_codes(rows)?;
    if !malformed.is_empty() {
        bail!(
            "{} carries {} malformed indicator code(s): {}",
            path.display(),
            malformed.len(),
            malformed.join(", ")
        );
    }
    Ok(())
}

/// `record_id: code` for every indicator or related-indicator code that is
/// not upper-case snake case.
pub(crate) fn malformed_indicator_codes(rows: &[RecordRow]) -> Result<Vec<String>> {
    let pattern =
        Regex::new(INDICATOR_CODE_PATTERN).context("failed to compile indicator code pattern")?;

    let mut malformed = Vec::new();
    for row in rows {
        for code in [&row.indicator_code, &row.related_indicator]
            .into_iter()
            .flatten()
        {
            let trimmed = code.trim();
            if !trimmed.is_empty() && !pattern.is_match(trimmed) {
                malformed.push(format!("{}: {trimmed}", row.record_id));
            }
        }
    }
    Ok(malformed)
}
