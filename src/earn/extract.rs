//! The seam between the engine and whatever reads source workbooks.
//!
//! The engine only sees these row shapes; the cell layout that produces
//! them belongs to the implementation (see `workbook.rs`).

use crate::earn::period::QuarterKey;
use crate::earn::table::{IndustryRow, ProjectionRow};
use anyhow::Result;
use chrono::NaiveDate;
use std::path::Path;

/// Headline price and EPS figures for one quarter.
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlineRow {
    pub yr_qtr: QuarterKey,
    pub date: Option<NaiveDate>,
    pub price: Option<f64>,
    pub op_eps: Option<f64>,
    pub rep_eps: Option<f64>,
    pub op_pe: Option<f64>,
    pub rep_pe: Option<f64>,
    pub op_eps_12m: Option<f64>,
    pub rep_eps_12m: Option<f64>,
}

impl HeadlineRow {
    pub fn new(yr_qtr: QuarterKey, date: Option<NaiveDate>) -> Self {
        Self {
            yr_qtr,
            date,
            price: None,
            op_eps: None,
            rep_eps: None,
            op_pe: None,
            rep_pe: None,
            op_eps_12m: None,
            rep_eps_12m: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarginRow {
    pub yr_qtr: QuarterKey,
    pub op_margin: Option<f64>,
}

/// Per-share quarterly fundamentals.
#[derive(Debug, Clone, PartialEq)]
pub struct FundamentalsRow {
    pub yr_qtr: QuarterKey,
    pub date: Option<NaiveDate>,
    pub div_ps: Option<f64>,
    pub sales_ps: Option<f64>,
    pub bk_val_ps: Option<f64>,
    pub capex_ps: Option<f64>,
    pub divisor: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalExtract {
    /// The as-of date printed in the workbook, if it could be read.
    pub as_of: Option<NaiveDate>,
    pub headline: Vec<HeadlineRow>,
    pub margins: Vec<MarginRow>,
    pub fundamentals: Vec<FundamentalsRow>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionExtract {
    pub as_of: Option<NaiveDate>,
    pub rows: Vec<ProjectionRow>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateObservation {
    pub date: NaiveDate,
    pub rate: Option<f64>,
}

pub trait SourceExtractor {
    fn historical(&self, path: &Path) -> Result<HistoricalExtract>;
    fn industry(&self, path: &Path) -> Result<Vec<IndustryRow>>;
    fn projections(&self, path: &Path) -> Result<ProjectionExtract>;
    fn real_rates(&self, path: &Path) -> Result<Vec<RateObservation>>;
}
