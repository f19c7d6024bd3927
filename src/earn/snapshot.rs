//! One immutable forward-estimate table per accepted source file.

use crate::earn::extract::ProjectionExtract;
use crate::earn::period::QuarterKey;
use crate::earn::table::{ProjectionRow, write_projections};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_EXT: &str = "csv";

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionSnapshot {
    pub capture_date: NaiveDate,
    pub period: QuarterKey,
    pub file_name: String,
    pub rows: Vec<ProjectionRow>,
}

/// Reasons a workbook cannot yield a snapshot. These skip the file, they
/// never abort the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotRejection {
    MissingAsOfDate,
    MissingRowDate { period: QuarterKey },
    NoRows,
}

impl std::fmt::Display for SnapshotRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingAsOfDate => write!(f, "missing projection date"),
            Self::MissingRowDate { period } => write!(f, "projection row {period} has no date"),
            Self::NoRows => write!(f, "no projection rows"),
        }
    }
}

pub fn snapshot_file_name(prefix: &str, capture_date: NaiveDate) -> String {
    format!("{prefix} {}.{SNAPSHOT_EXT}", capture_date.format("%Y-%m-%d"))
}

/// Validates the extracted estimates and names the snapshot after the
/// source file's capture date.
pub fn build_snapshot(
    prefix: &str,
    capture_date: NaiveDate,
    extract: ProjectionExtract,
) -> Result<ProjectionSnapshot, SnapshotRejection> {
    if extract.as_of.is_none() {
        return Err(SnapshotRejection::MissingAsOfDate);
    }
    if extract.rows.is_empty() {
        return Err(SnapshotRejection::NoRows);
    }
    if let Some(row) = extract.rows.iter().find(|row| row.date.is_none()) {
        return Err(SnapshotRejection::MissingRowDate { period: row.yr_qtr });
    }
    Ok(ProjectionSnapshot {
        capture_date,
        period: QuarterKey::from_date(capture_date),
        file_name: snapshot_file_name(prefix, capture_date),
        rows: extract.rows,
    })
}

pub fn write_snapshot(dir: &Path, snapshot: &ProjectionSnapshot) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let path = dir.join(&snapshot.file_name);
    write_projections(&path, &snapshot.rows)?;
    Ok(path)
}

/// Deletes a retired snapshot. Returns false when the file was already gone.
pub fn delete_snapshot(dir: &Path, file_name: &str) -> Result<bool> {
    let path = dir.join(file_name);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).with_context(|| format!("failed to remove {}", path.display()))?;
    Ok(true)
}

/// Snapshot file names present in `dir`, sorted descending.
pub fn list_snapshot_files(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            out.push(name.to_string());
        }
    }
    out.sort_by(|a, b| b.cmp(a));
    Ok(out)
}
