pub mod forecast;
pub mod impact;
pub mod ingest;
pub mod series;
pub mod status;
pub mod validate;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use finclusion::db;
use finclusion::engine::{RecordRow, RecordStore};
use tracing::info;

pub(crate) fn load_stored_rows(db_path: &Path) -> Result<Vec<RecordRow>> {
    if !db_path.exists() {
        bail!(
            "database not found at {}; run `finclusion ingest --records <file>` first",
            db_path.display()
        );
    }

    let connection = db::open_read_only(db_path)?;
    let rows = db::load_record_rows(&connection)
        .with_context(|| format!("failed to load records from {}", db_path.display()))?;
    info!(path = %db_path.display(), rows = rows.len(), "loaded stored record table");
    Ok(rows)
}

pub(crate) fn load_store(db_path: &Path) -> Result<RecordStore> {
    let rows = load_stored_rows(db_path)?;
    RecordStore::from_rows(&rows).with_context(|| {
        format!(
            "stored record table in {} failed integrity checks; run `finclusion validate`",
            db_path.display()
        )
    })
}

/// Newest manifest whose file name starts with `prefix`. Names embed a
/// compact UTC timestamp, so lexical order is chronological.
pub(crate) fn latest_manifest(manifest_dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    if !manifest_dir.exists() {
        return Ok(None);
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(manifest_dir)
        .with_context(|| format!("failed to list {}", manifest_dir.display()))?
    {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix) && name.ends_with(".json"));
        if matches {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates.pop())
}
