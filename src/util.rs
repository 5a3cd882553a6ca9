use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn manifest_dir(cache_root: &Path) -> PathBuf {
    cache_root.join("manifests")
}

pub fn default_db_path(cache_root: &Path, db_path: Option<&PathBuf>) -> PathBuf {
    db_path
        .cloned()
        .unwrap_or_else(|| cache_root.join("finclusion.sqlite"))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(
        File::open(path)
            .with_context(|| format!("failed to open file for hashing: {}", path.display()))?,
    );

    let mut hasher = Sha256::new();
    let mut buf = [0_u8; 8192];
    loop {
        let count = reader
            .read(&mut buf)
            .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
        if count == 0 {
            break;
        }
        hasher.update(&buf[..count]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw =
        fs::read(path).with_context(|| format!("failed to read json file: {}", path.display()))?;
    serde_json::from_slice(&raw)
        .with_context(|| format!("failed to parse json file: {}", path.display()))
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_directory(parent)?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Pretty JSON on stdout, newline-terminated.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let stdout = std::io::stdout();
    let mut writer = std::io::BufWriter::new(stdout.lock());
    serde_json::to_writer_pretty(&mut writer, value).context("failed to write json output")?;
    writeln!(writer).context("failed to finalize json output")?;
    writer.flush().context("failed to flush json output")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_timestamp_has_no_separators() {
        let ts = DateTime::parse_from_rfc3339("2026-01-20T09:05:07Z")
            .expect("valid timestamp")
            .with_timezone(&Utc);
        assert_eq!(utc_compact_string(ts), "20260120T090507Z");
    }

    #[test]
    fn db_path_defaults_under_cache_root() {
        let root = Path::new(".cache/finclusion");
        assert_eq!(
            default_db_path(root, None),
            PathBuf::from(".cache/finclusion/finclusion.sqlite")
        );
        let explicit = PathBuf::from("/tmp/other.sqlite");
        assert_eq!(default_db_path(root, Some(&explicit)), explicit);
    }

    #[test]
    fn json_files_round_trip_through_disk() {
        let dir = std::env::temp_dir().join(format!("finclusion-util-{}", std::process::id()));
        let path = dir.join("nested").join("value.json");
        write_json_pretty(&path, &vec![1_i32, 2, 3]).expect("write should succeed");

        let loaded: Vec<i32> = read_json_file(&path).expect("read should succeed");
        assert_eq!(loaded, vec![1, 2, 3]);
        assert_eq!(sha256_file(&path).expect("hash").len(), 64);

        fs::remove_dir_all(&dir).expect("cleanup");
    }
}
