//! `calamine`-backed reader for the S&P estimates workbook and the FRED
//! real-rate workbook.
//!
//! Row and column positions below are zero-based; column `A` is 0.

use crate::earn::extract::{
    FundamentalsRow, HeadlineRow, HistoricalExtract, MarginRow, ProjectionExtract,
    RateObservation, SourceExtractor,
};
use crate::earn::period::{QuarterKey, YearKey};
use crate::earn::table::{IndustryRow, ProjectionRow};
use crate::error::EarnError;
use anyhow::{Context, Result, anyhow};
use calamine::{Data, Range, Reader, open_workbook_auto};
use chrono::{Days, NaiveDate};
use std::path::Path;

const SHEET_ESTIMATES: &str = "ESTIMATES&PEs";
const SHEET_QUARTERLY: &str = "QUARTERLY DATA";
const SHEET_SECTORS: &str = "SECTOR EPS";

const DATE_KEYS: &[&str] = &["Date", "Data as of the close of:"];
const ACTUAL_KEYS: &[&str] = &["ACTUALS", "Actuals"];
const ESTIMATE_KEYS: &[&str] = &["ESTIMATES"];
const QUARTER_END_KEYS: &[&str] = &["END"];
const MARGIN_KEY: &str = "QTR";

const AS_OF_COL: usize = 3;
const PRICE_COL: usize = 1;

/// Columns A..J minus E and H: date, price, four EPS/PE values, two 12m EPS.
const ACTUAL_COLS: [usize; 8] = [0, 1, 2, 3, 5, 6, 8, 9];
/// Columns A..J minus B, E and H: the actual layout without price.
const ESTIMATE_COLS: [usize; 7] = [0, 2, 3, 5, 6, 8, 9];
/// Columns A..I minus B, C and H.
const QUARTERLY_COLS: [usize; 6] = [0, 3, 4, 5, 6, 8];

const SECTOR_FIRST_OP_ROW: usize = 5;
const SECTOR_FIRST_REP_ROW: usize = 62;
const SECTOR_COUNT: usize = 12;
const SECTOR_HEADER_SEARCH: usize = 5;

const RATE_FIRST_ROW: usize = 11;

/// A sheet as absolute rows, so positions match the workbook.
#[derive(Debug, Clone, Default)]
struct Grid {
    cells: Vec<Vec<Data>>,
}

impl Grid {
    fn from_range(range: &Range<Data>) -> Self {
        let (row0, col0) = range.start().unwrap_or((0, 0));
        let mut cells = vec![Vec::new(); row0 as usize];
        for row in range.rows() {
            let mut line = vec![Data::Empty; col0 as usize];
            line.extend(row.iter().cloned());
            cells.push(line);
        }
        Self { cells }
    }

    #[cfg(test)]
    fn from_rows(cells: Vec<Vec<Data>>) -> Self {
        Self { cells }
    }

    fn height(&self) -> usize {
        self.cells.len()
    }

    fn cell(&self, row: usize, col: usize) -> Option<&Data> {
        self.cells.get(row).and_then(|line| line.get(col))
    }

    fn text(&self, row: usize, col: usize) -> Option<String> {
        cell_text(self.cell(row, col))
    }

    /// First row at or after `from` whose column A matches one of `keys`.
    fn find_key_row(&self, from: usize, keys: &[&str]) -> Option<usize> {
        (from..self.height()).find(|&row| {
            self.text(row, 0)
                .is_some_and(|text| keys.iter().any(|key| text == *key))
        })
    }
}

fn cell_text(cell: Option<&Data>) -> Option<String> {
    let text = match cell? {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => f.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn cell_number(cell: Option<&Data>) -> Option<f64> {
    match cell? {
        Data::Float(f) => Some(*f),
        Data::Int(i) => Some(*i as f64),
        Data::String(s) => {
            let trimmed = s.trim().replace(',', "");
            match trimmed.strip_suffix('%') {
                Some(pct) => pct.trim().parse::<f64>().ok().map(|v| v / 100.0),
                None => trimmed.parse::<f64>().ok(),
            }
        }
        _ => None,
    }
}

fn serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !(1.0..=2_958_465.0).contains(&serial) {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_days(Days::new(serial.floor() as u64))
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    // trailing annotations such as "(prelim.)" follow the date
    let token = text.split_whitespace().next()?;
    ["%m/%d/%Y", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(token, fmt).ok())
}

fn cell_date(cell: Option<&Data>) -> Option<NaiveDate> {
    match cell? {
        Data::DateTime(dt) => serial_to_date(dt.as_f64()),
        Data::Float(f) => serial_to_date(*f),
        Data::Int(i) => serial_to_date(*i as f64),
        Data::DateTimeIso(s) | Data::String(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

/// Year from labels like `2024`, `2024.0`, `2024E` or `2024 E`.
fn year_label(cell: Option<&Data>) -> Option<i32> {
    let year = match cell? {
        Data::Int(i) => i32::try_from(*i).ok()?,
        Data::Float(f) if f.fract() == 0.0 => *f as i32,
        Data::String(s) => {
            let digits = s.trim().get(..4)?;
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()?
        }
        _ => return None,
    };
    (1900..=2200).contains(&year).then_some(year)
}

/// Column name stem for a sector label; the index row becomes `SP500`.
fn sector_stem(label: &str) -> Option<String> {
    let label = label.trim().replace("S&P 500", "SP500");
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let stem = out.trim_matches('_');
    (!stem.is_empty()).then(|| stem.to_string())
}

/// Reads the date in column A of a block row.
///
/// Rows with no date are `Ok(None)`; header text without digits is skipped
/// the same way. Text that looks like a date but does not parse is an error.
fn block_row_date(grid: &Grid, row: usize, file: &str) -> Result<Option<NaiveDate>, EarnError> {
    if let Some(date) = cell_date(grid.cell(row, 0)) {
        return Ok(Some(date));
    }
    match grid.text(row, 0) {
        Some(text) if text.chars().any(|c| c.is_ascii_digit()) => Err(EarnError::Extraction {
            file: file.to_string(),
            reason: format!("row {} has an unreadable date: {text}", row + 1),
        }),
        _ => Ok(None),
    }
}

/// Dated rows between the row after `start` and `end` (exclusive), or the
/// first empty column-A cell when `end` is `None`.
fn dated_rows(
    grid: &Grid,
    start: usize,
    end: Option<usize>,
    file: &str,
) -> Result<Vec<(usize, NaiveDate)>, EarnError> {
    let mut out = Vec::new();
    let stop = end.unwrap_or(grid.height());
    for row in (start + 1)..stop {
        if end.is_none() && grid.cell(row, 0).is_none_or(|c| matches!(c, Data::Empty)) {
            if !out.is_empty() {
                break;
            }
            continue;
        }
        if let Some(date) = block_row_date(grid, row, file)? {
            out.push((row, date));
        }
    }
    Ok(out)
}

fn read_as_of(grid: &Grid) -> (Option<NaiveDate>, Option<f64>) {
    let Some(row) = grid.find_key_row(0, DATE_KEYS) else {
        return (None, None);
    };
    (
        cell_date(grid.cell(row, AS_OF_COL)),
        cell_number(grid.cell(row, PRICE_COL)),
    )
}

fn read_actuals(grid: &Grid, file: &str) -> Result<Vec<HeadlineRow>, EarnError> {
    let Some(start) = grid.find_key_row(0, ACTUAL_KEYS) else {
        return Err(EarnError::Extraction {
            file: file.to_string(),
            reason: format!("no {} block in {SHEET_ESTIMATES}", ACTUAL_KEYS[0]),
        });
    };
    let rows = dated_rows(grid, start, None, file)?;
    Ok(rows
        .into_iter()
        .map(|(row, date)| {
            let value = |idx: usize| cell_number(grid.cell(row, ACTUAL_COLS[idx]));
            let mut out = HeadlineRow::new(QuarterKey::from_date(date), Some(date));
            out.price = value(1);
            out.op_eps = value(2);
            out.rep_eps = value(3);
            out.op_pe = value(4);
            out.rep_pe = value(5);
            out.op_eps_12m = value(6);
            out.rep_eps_12m = value(7);
            out
        })
        .collect())
}

fn read_margins(grid: &Grid) -> Vec<MarginRow> {
    let Some(header) = grid.find_key_row(0, &[MARGIN_KEY]) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for row in (header + 1)..grid.height() {
        let Some(year) = year_label(grid.cell(row, 0)) else {
            break;
        };
        for quarter in 1..=4u8 {
            let Some(op_margin) = cell_number(grid.cell(row, quarter as usize)) else {
                continue;
            };
            if let Some(yr_qtr) = QuarterKey::new(year, quarter) {
                out.push(MarginRow {
                    yr_qtr,
                    op_margin: Some(op_margin),
                });
            }
        }
    }
    out
}

fn read_fundamentals(grid: &Grid, file: &str) -> Result<Vec<FundamentalsRow>, EarnError> {
    let Some(start) = grid.find_key_row(0, QUARTER_END_KEYS) else {
        return Ok(Vec::new());
    };
    let rows = dated_rows(grid, start, None, file)?;
    Ok(rows
        .into_iter()
        .map(|(row, date)| {
            let value = |idx: usize| cell_number(grid.cell(row, QUARTERLY_COLS[idx]));
            FundamentalsRow {
                yr_qtr: QuarterKey::from_date(date),
                date: Some(date),
                div_ps: value(1),
                sales_ps: value(2),
                bk_val_ps: value(3),
                capex_ps: value(4),
                divisor: value(5),
            }
        })
        .collect())
}

fn read_estimates(grid: &Grid, file: &str) -> Result<Vec<ProjectionRow>, EarnError> {
    let missing = |key: &str| EarnError::Extraction {
        file: file.to_string(),
        reason: format!("no {key} block in {SHEET_ESTIMATES}"),
    };
    let start = grid
        .find_key_row(0, ESTIMATE_KEYS)
        .ok_or_else(|| missing(ESTIMATE_KEYS[0]))?;
    let end = grid
        .find_key_row(start + 1, ACTUAL_KEYS)
        .ok_or_else(|| missing(ACTUAL_KEYS[0]))?;
    let rows = dated_rows(grid, start, Some(end), file)?;
    Ok(rows
        .into_iter()
        .map(|(row, date)| {
            let value = |idx: usize| cell_number(grid.cell(row, ESTIMATE_COLS[idx]));
            ProjectionRow {
                yr_qtr: QuarterKey::from_date(date),
                date: Some(date),
                op_eps: value(1),
                rep_eps: value(2),
                op_pe: value(3),
                rep_pe: value(4),
                op_eps_12m: value(5),
                rep_eps_12m: value(6),
            }
        })
        .collect())
}

/// Year columns of the header row nearest above `first_row`.
fn sector_year_columns(grid: &Grid, first_row: usize) -> Vec<(usize, i32)> {
    for row in (first_row.saturating_sub(SECTOR_HEADER_SEARCH)..first_row).rev() {
        let width = grid.cells.get(row).map_or(0, Vec::len);
        let years = (1..width)
            .filter_map(|col| year_label(grid.cell(row, col)).map(|year| (col, year)))
            .collect::<Vec<_>>();
        if !years.is_empty() {
            return years;
        }
    }
    Vec::new()
}

fn read_sector_block(
    grid: &Grid,
    first_row: usize,
    suffix: &str,
    years: &mut std::collections::BTreeMap<i32, IndustryRow>,
) {
    let columns = sector_year_columns(grid, first_row);
    for row in first_row..first_row + SECTOR_COUNT {
        let Some(stem) = grid.text(row, 0).and_then(|label| sector_stem(&label)) else {
            continue;
        };
        let column = format!("{stem}_{suffix}");
        for &(col, year) in &columns {
            years
                .entry(year)
                .or_insert_with(|| IndustryRow::new(YearKey::new(year)))
                .set(&column, cell_number(grid.cell(row, col)));
        }
    }
}

fn read_sectors(grid: &Grid) -> Vec<IndustryRow> {
    let mut years = std::collections::BTreeMap::new();
    read_sector_block(grid, SECTOR_FIRST_OP_ROW, "op_eps", &mut years);
    read_sector_block(grid, SECTOR_FIRST_REP_ROW, "rep_eps", &mut years);
    years.into_values().collect()
}

fn read_rates(grid: &Grid) -> Vec<RateObservation> {
    (RATE_FIRST_ROW..grid.height())
        .map_while(|row| {
            let date = cell_date(grid.cell(row, 0))?;
            Some(RateObservation {
                date,
                rate: cell_number(grid.cell(row, 1)),
            })
        })
        .collect()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map_or_else(|| path.display().to_string(), str::to_string)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorkbookExtractor;

impl WorkbookExtractor {
    fn sheet(&self, path: &Path, name: &str) -> Result<Grid> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range(name)
            .with_context(|| format!("failed to read sheet {name} of {}", path.display()))?;
        Ok(Grid::from_range(&range))
    }

    fn first_sheet(&self, path: &Path) -> Result<Grid> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("failed to open workbook {}", path.display()))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| anyhow!("{} has no sheets", path.display()))?
            .with_context(|| format!("failed to read first sheet of {}", path.display()))?;
        Ok(Grid::from_range(&range))
    }
}

impl SourceExtractor for WorkbookExtractor {
    fn historical(&self, path: &Path) -> Result<HistoricalExtract> {
        let file = file_label(path);
        let estimates = self.sheet(path, SHEET_ESTIMATES)?;
        let quarterly = self.sheet(path, SHEET_QUARTERLY)?;

        let (as_of, price) = read_as_of(&estimates);
        let mut headline = Vec::new();
        if let Some(date) = as_of {
            let mut latest = HeadlineRow::new(QuarterKey::from_date(date), Some(date));
            latest.price = price;
            headline.push(latest);
        }
        headline.extend(read_actuals(&estimates, &file)?);

        Ok(HistoricalExtract {
            as_of,
            headline,
            margins: read_margins(&estimates),
            fundamentals: read_fundamentals(&quarterly, &file)?,
        })
    }

    fn industry(&self, path: &Path) -> Result<Vec<IndustryRow>> {
        Ok(read_sectors(&self.sheet(path, SHEET_SECTORS)?))
    }

    fn projections(&self, path: &Path) -> Result<ProjectionExtract> {
        let file = file_label(path);
        let grid = self.sheet(path, SHEET_ESTIMATES)?;
        let (as_of, _) = read_as_of(&grid);
        Ok(ProjectionExtract {
            as_of,
            rows: read_estimates(&grid, &file)?,
        })
    }

    fn real_rates(&self, path: &Path) -> Result<Vec<RateObservation>> {
        Ok(read_rates(&self.first_sheet(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Data {
        Data::String(text.to_string())
    }

    fn f(value: f64) -> Data {
        Data::Float(value)
    }

    fn e() -> Data {
        Data::Empty
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn estimates_sheet() -> Grid {
        Grid::from_rows(vec![
            vec![s("S&P 500 EARNINGS")],
            vec![s("Data as of the close of:"), f(5246.68), e(), s("05/15/2024")],
            vec![e()],
            vec![s("ESTIMATES")],
            vec![
                s("12/31/2024"), e(), f(62.1), f(57.0), e(), f(21.7), f(23.6), e(), f(243.5), f(221.4),
            ],
            vec![
                s("09/30/2024 (prelim.)"), e(), f(60.3), f(55.1), e(), f(22.4), f(24.5), e(), f(235.0),
                f(212.1),
            ],
            vec![s("ACTUALS")],
            vec![
                f(45382.0), f(5254.35), f(54.6), f(47.4), e(), f(23.0), f(25.9), e(), f(228.4), f(202.4),
            ],
            vec![
                s("12/31/2023"), f(4769.83), f(53.0), f(45.8), e(), f(22.2), f(25.1), e(), f(213.5),
                f(192.4),
            ],
            vec![e()],
            vec![s("QTR"), s("Q1"), s("Q2"), s("Q3"), s("Q4")],
            vec![f(2024.0), s("11.4%"), e(), e(), e()],
            vec![f(2023.0), f(0.1108), f(0.1163), f(0.1215), f(0.1143)],
            vec![e()],
        ])
    }

    #[test]
    fn cell_conversions() {
        assert_eq!(cell_date(Some(&f(45291.0))), Some(date(2023, 12, 31)));
        assert_eq!(cell_date(Some(&s("03/31/2024"))), Some(date(2024, 3, 31)));
        assert_eq!(cell_date(Some(&s("2024-03-31"))), Some(date(2024, 3, 31)));
        assert_eq!(cell_date(Some(&s("ACTUALS"))), None);
        assert_eq!(cell_number(Some(&s("11.4%"))), Some(0.114));
        assert_eq!(cell_number(Some(&s("1,234.5"))), Some(1234.5));
        assert_eq!(year_label(Some(&s("2025E"))), Some(2025));
        assert_eq!(year_label(Some(&f(2023.0))), Some(2023));
        assert_eq!(year_label(Some(&s("Q1"))), None);
        assert_eq!(sector_stem("S&P 500").as_deref(), Some("SP500"));
        assert_eq!(
            sector_stem(" Information Technology ").as_deref(),
            Some("Information_Technology")
        );
    }

    #[test]
    fn as_of_and_actuals_block() {
        let grid = estimates_sheet();
        let (as_of, price) = read_as_of(&grid);
        assert_eq!(as_of, Some(date(2024, 5, 15)));
        assert_eq!(price, Some(5246.68));

        let actuals = read_actuals(&grid, "f.xlsx").expect("actuals");
        assert_eq!(actuals.len(), 2);
        assert_eq!(actuals[0].yr_qtr.to_string(), "2024-Q1");
        assert_eq!(actuals[0].price, Some(5254.35));
        assert_eq!(actuals[0].op_pe, Some(23.0));
        assert_eq!(actuals[1].rep_eps_12m, Some(192.4));
    }

    #[test]
    fn estimates_block_stops_at_actuals_and_skips_price() {
        let rows = read_estimates(&estimates_sheet(), "f.xlsx").expect("estimates");
        let keys = rows.iter().map(|r| r.yr_qtr.to_string()).collect::<Vec<_>>();
        assert_eq!(keys, vec!["2024-Q4", "2024-Q3"]);
        assert_eq!(rows[0].op_eps, Some(62.1));
        assert_eq!(rows[0].rep_eps_12m, Some(221.4));
    }

    #[test]
    fn unreadable_estimate_date_is_an_extraction_error() {
        let grid = Grid::from_rows(vec![
            vec![s("ESTIMATES")],
            vec![s("13/45/2024")],
            vec![s("ACTUALS")],
        ]);
        assert!(matches!(
            read_estimates(&grid, "f.xlsx"),
            Err(EarnError::Extraction { .. })
        ));
    }

    #[test]
    fn margins_read_until_the_year_column_ends() {
        let margins = read_margins(&estimates_sheet());
        assert_eq!(margins.len(), 5);
        assert_eq!(margins[0].yr_qtr.to_string(), "2024-Q1");
        assert_eq!(margins[0].op_margin, Some(0.114));
        assert_eq!(margins[4].yr_qtr.to_string(), "2023-Q4");
    }

    #[test]
    fn quarterly_fundamentals_use_their_own_columns() {
        let grid = Grid::from_rows(vec![
            vec![s("QUARTERLY DATA")],
            vec![s("END")],
            vec![
                s("03/31/2024"), f(1.0), f(2.0), f(18.2), f(460.1), f(1120.4), f(112.3), f(9.9), f(8612.0),
            ],
            vec![e()],
            vec![s("notes")],
        ]);
        let rows = read_fundamentals(&grid, "f.xlsx").expect("fundamentals");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].div_ps, Some(18.2));
        assert_eq!(rows[0].capex_ps, Some(112.3));
        assert_eq!(rows[0].divisor, Some(8612.0));
    }

    #[test]
    fn sector_blocks_pivot_to_one_row_per_year() {
        let mut cells = vec![Vec::new(); SECTOR_FIRST_REP_ROW + SECTOR_COUNT];
        cells[SECTOR_FIRST_OP_ROW - 1] = vec![e(), s("2024E"), f(2023.0)];
        cells[SECTOR_FIRST_OP_ROW] = vec![s("S&P 500"), f(243.0), f(221.4)];
        cells[SECTOR_FIRST_OP_ROW + 1] = vec![s("Energy"), f(22.0), f(25.1)];
        cells[SECTOR_FIRST_REP_ROW - 1] = vec![e(), s("2024E"), f(2023.0)];
        cells[SECTOR_FIRST_REP_ROW] = vec![s("S&P 500"), e(), f(197.9)];
        let rows = read_sectors(&Grid::from_rows(cells));

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].year.year(), 2023);
        assert_eq!(rows[0].value("Energy_op_eps"), Some(25.1));
        assert!(rows[0].is_finalized());
        assert_eq!(rows[1].value("SP500_op_eps"), Some(243.0));
        assert!(!rows[1].is_finalized());
    }

    #[test]
    fn rate_series_starts_below_the_header() {
        let mut cells = vec![vec![s("FRED Graph")]; RATE_FIRST_ROW];
        cells.push(vec![s("2024-03-28"), f(1.88)]);
        cells.push(vec![s("2024-03-29"), s("")]);
        cells.push(vec![e()]);
        let rates = read_rates(&Grid::from_rows(cells));
        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].rate, Some(1.88));
        assert_eq!(rates[1].rate, None);
    }
}
