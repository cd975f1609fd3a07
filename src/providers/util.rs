use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Files in `dir` whose name satisfies `keep`, sorted by file name.
pub async fn list_files<F>(dir: &Path, keep: F) -> Result<Vec<PathBuf>>
where
    F: Fn(&str) -> bool,
{
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let keep_it = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(&keep);
        if keep_it && entry.file_type().await?.is_file() {
            files.push(path);
        }
    }
    files.sort();
    debug!("Found {} input files in {}", files.len(), dir.display());
    Ok(files)
}

/// Last modification time of a file, used as the collection time of its rows.
pub async fn modified_at(path: &Path) -> Result<DateTime<Utc>> {
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    Ok(DateTime::<Utc>::from(metadata.modified()?))
}

/// Parses a numeric cell, tolerating thousands separators and dash placeholders.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, ',' | '\u{2014}' | '\u{2013}'))
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("nan") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses `YYYYMMDD`, ISO `YYYY-MM-DD` (optionally followed by a time) or `MM/DD/YYYY`.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.len() == 8 && raw.bytes().all(|b| b.is_ascii_digit()) {
        return NaiveDate::parse_from_str(raw, "%Y%m%d").ok();
    }
    let head = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(head, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%m/%d/%Y"))
        .ok()
}
