//! Row types of the durable tables and their CSV storage.
//!
//! Every table write stages a temp file in the destination directory and
//! renames it into place; a reader never sees a half-written table.

use crate::earn::period::{QuarterKey, YearKey};
use anyhow::{Context, Result, anyhow};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRow {
    pub yr_qtr: QuarterKey,
    pub date: Option<NaiveDate>,
    pub price: Option<f64>,
    pub op_eps: Option<f64>,
    pub rep_eps: Option<f64>,
    #[serde(rename = "op_p/e")]
    pub op_pe: Option<f64>,
    #[serde(rename = "rep_p/e")]
    pub rep_pe: Option<f64>,
    #[serde(rename = "12m_op_eps")]
    pub op_eps_12m: Option<f64>,
    #[serde(rename = "12m_rep_eps")]
    pub rep_eps_12m: Option<f64>,
    pub op_margin: Option<f64>,
    pub div_ps: Option<f64>,
    pub sales_ps: Option<f64>,
    pub bk_val_ps: Option<f64>,
    pub capex_ps: Option<f64>,
    pub divisor: Option<f64>,
    pub real_int_rate: Option<f64>,
}

impl HistoricalRow {
    pub fn empty(yr_qtr: QuarterKey) -> Self {
        Self {
            yr_qtr,
            date: None,
            price: None,
            op_eps: None,
            rep_eps: None,
            op_pe: None,
            rep_pe: None,
            op_eps_12m: None,
            rep_eps_12m: None,
            op_margin: None,
            div_ps: None,
            sales_ps: None,
            bk_val_ps: None,
            capex_ps: None,
            divisor: None,
            real_int_rate: None,
        }
    }

    /// A quarter is final once its operating EPS has been reported.
    pub fn is_finalized(&self) -> bool {
        self.op_eps.is_some()
    }
}

/// Annual sector figures. Sector columns keep the order they were read in.
#[derive(Debug, Clone, PartialEq)]
pub struct IndustryRow {
    pub year: YearKey,
    pub values: Vec<(String, Option<f64>)>,
    pub real_int_rate: Option<f64>,
}

pub const INDUSTRY_FINAL_FIELD: &str = "SP500_rep_eps";
const YEAR_COLUMN: &str = "year";
const REAL_RATE_COLUMN: &str = "real_int_rate";

impl IndustryRow {
    pub fn new(year: YearKey) -> Self {
        Self {
            year,
            values: Vec::new(),
            real_int_rate: None,
        }
    }

    pub fn value(&self, column: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(name, _)| name == column)
            .and_then(|(_, value)| *value)
    }

    pub fn set(&mut self, column: &str, value: Option<f64>) {
        match self.values.iter_mut().find(|(name, _)| name == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column.to_string(), value)),
        }
    }

    /// A year is final once the index-level reported EPS is present.
    pub fn is_finalized(&self) -> bool {
        self.value(INDUSTRY_FINAL_FIELD).is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRow {
    pub yr_qtr: QuarterKey,
    pub date: Option<NaiveDate>,
    pub op_eps: Option<f64>,
    pub rep_eps: Option<f64>,
    #[serde(rename = "op_p/e")]
    pub op_pe: Option<f64>,
    #[serde(rename = "rep_p/e")]
    pub rep_pe: Option<f64>,
    #[serde(rename = "12m_op_eps")]
    pub op_eps_12m: Option<f64>,
    #[serde(rename = "12m_rep_eps")]
    pub rep_eps_12m: Option<f64>,
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, row) in reader.deserialize::<T>().enumerate() {
        let row =
            row.with_context(|| format!("failed to parse row {} of {}", idx + 1, path.display()))?;
        out.push(row);
    }
    Ok(out)
}

fn stage_and_persist(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush rows for {}: {err}", path.display()))?;
    stage_and_persist(path, &bytes)
}

/// Moves the current table at `path` to `backup`, replacing any older backup.
///
/// Returns false when there was no table to back up.
pub fn backup_table(path: &Path, backup: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    crate::earn::archive::move_file(path, backup)?;
    Ok(true)
}

pub fn read_historical(path: &Path) -> Result<Vec<HistoricalRow>> {
    read_rows(path)
}

pub fn write_historical(path: &Path, rows: &[HistoricalRow]) -> Result<()> {
    write_rows(path, rows)
}

pub fn read_projections(path: &Path) -> Result<Vec<ProjectionRow>> {
    read_rows(path)
}

pub fn write_projections(path: &Path, rows: &[ProjectionRow]) -> Result<()> {
    write_rows(path, rows)
}

fn parse_cell(raw: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(Some)
        .map_err(|_| anyhow!("invalid number `{trimmed}`"))
}

pub fn read_industry(path: &Path) -> Result<Vec<IndustryRow>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    if headers.get(0) != Some(YEAR_COLUMN) {
        anyhow::bail!("{} does not start with a `year` column", path.display());
    }

    let mut out = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record =
            record.with_context(|| format!("failed to read row {} of {}", idx + 1, path.display()))?;
        let year: YearKey = record
            .get(0)
            .unwrap_or_default()
            .parse()
            .map_err(|err: String| anyhow!("{}: {err}", path.display()))?;
        let mut row = IndustryRow::new(year);
        for (column, raw) in headers.iter().zip(record.iter()).skip(1) {
            let value = parse_cell(raw)
                .with_context(|| format!("row {} column {column} of {}", idx + 1, path.display()))?;
            if column == REAL_RATE_COLUMN {
                row.real_int_rate = value;
            } else {
                row.set(column, value);
            }
        }
        out.push(row);
    }
    Ok(out)
}

/// Sector columns across `rows`, in first-seen order.
pub fn industry_columns(rows: &[IndustryRow]) -> Vec<String> {
    let mut columns: Vec<String> = Vec::new();
    for row in rows {
        for (name, _) in &row.values {
            if !columns.iter().any(|c| c == name) {
                columns.push(name.clone());
            }
        }
    }
    columns
}

fn format_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn write_industry(path: &Path, rows: &[IndustryRow]) -> Result<()> {
    let columns = industry_columns(rows);
    let mut writer = csv::Writer::from_writer(Vec::new());

    let mut header = vec![YEAR_COLUMN.to_string()];
    header.extend(columns.iter().cloned());
    header.push(REAL_RATE_COLUMN.to_string());
    writer.write_record(&header)?;

    for row in rows {
        let mut record = vec![row.year.to_string()];
        record.extend(columns.iter().map(|c| format_cell(row.value(c))));
        record.push(format_cell(row.real_int_rate));
        writer.write_record(&record)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush rows for {}: {err}", path.display()))?;
    stage_and_persist(path, &bytes)
}
