//! Folds newly extracted quarters into the cumulative actuals table.
//!
//! The stages are separate functions so each can be checked on its own:
//! [`guard_capture_dates`] is the fatal check on the raw extraction,
//! [`join_extractions`] builds the wide incoming table, and
//! [`merge_historical`] applies the finalization rule.

use crate::earn::extract::{HistoricalExtract, RateObservation};
use crate::earn::period::QuarterKey;
use crate::earn::table::HistoricalRow;
use crate::error::EarnError;
use std::collections::BTreeMap;

/// Last observed rate in each quarter; quarters with only gaps are absent.
pub fn quarterly_real_rates(observations: &[RateObservation]) -> BTreeMap<QuarterKey, f64> {
    let mut sorted = observations.to_vec();
    sorted.sort_by_key(|obs| obs.date);
    let mut out = BTreeMap::new();
    for obs in sorted {
        if let Some(rate) = obs.rate {
            out.insert(QuarterKey::from_date(obs.date), rate);
        }
    }
    out
}

/// Joins the three sub-extractions on quarter and attaches real rates.
///
/// Headline rows are the spine: they carry the capture dates. Margin and
/// fundamentals rows fill in the quarters the headline covers, and fields
/// they do not cover stay null. Quarters that only margins or fundamentals
/// mention are dropped. When one extraction repeats a quarter, its later
/// non-null values win.
pub fn join_extractions(
    extract: &HistoricalExtract,
    rates: &BTreeMap<QuarterKey, f64>,
) -> Vec<HistoricalRow> {
    let mut wide: BTreeMap<QuarterKey, HistoricalRow> = BTreeMap::new();

    for h in &extract.headline {
        let row = wide
            .entry(h.yr_qtr)
            .or_insert_with(|| HistoricalRow::empty(h.yr_qtr));
        row.date = h.date.or(row.date);
        row.price = h.price.or(row.price);
        row.op_eps = h.op_eps.or(row.op_eps);
        row.rep_eps = h.rep_eps.or(row.rep_eps);
        row.op_pe = h.op_pe.or(row.op_pe);
        row.rep_pe = h.rep_pe.or(row.rep_pe);
        row.op_eps_12m = h.op_eps_12m.or(row.op_eps_12m);
        row.rep_eps_12m = h.rep_eps_12m.or(row.rep_eps_12m);
    }

    for m in &extract.margins {
        if let Some(row) = wide.get_mut(&m.yr_qtr) {
            row.op_margin = m.op_margin.or(row.op_margin);
        }
    }

    for f in &extract.fundamentals {
        let Some(row) = wide.get_mut(&f.yr_qtr) else {
            continue;
        };
        row.date = row.date.or(f.date);
        row.div_ps = f.div_ps.or(row.div_ps);
        row.sales_ps = f.sales_ps.or(row.sales_ps);
        row.bk_val_ps = f.bk_val_ps.or(row.bk_val_ps);
        row.capex_ps = f.capex_ps.or(row.capex_ps);
        row.divisor = f.divisor.or(row.divisor);
    }

    for row in wide.values_mut() {
        row.real_int_rate = rates.get(&row.yr_qtr).copied();
    }

    wide.into_values().collect()
}

/// Rejects the batch when the workbook date or any headline row's date is
/// missing. Runs before the join.
pub fn guard_capture_dates(file: &str, extract: &HistoricalExtract) -> Result<(), EarnError> {
    if extract.as_of.is_none() {
        return Err(EarnError::MissingCaptureDate {
            file: file.to_string(),
            period: "as-of".to_string(),
        });
    }
    match extract.headline.iter().find(|row| row.date.is_none()) {
        Some(row) => Err(EarnError::MissingCaptureDate {
            file: file.to_string(),
            period: row.yr_qtr.to_string(),
        }),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoricalMerge {
    /// Ascending by quarter.
    pub rows: Vec<HistoricalRow>,
    pub replaced: usize,
    pub appended: usize,
    /// Incoming rows dropped because their quarter was already final.
    pub protected: usize,
}

/// Splits stored rows into finalized and open quarters.
pub fn partition_finalized(
    existing: &[HistoricalRow],
) -> (
    BTreeMap<QuarterKey, HistoricalRow>,
    BTreeMap<QuarterKey, HistoricalRow>,
) {
    let mut finalized = BTreeMap::new();
    let mut open = BTreeMap::new();
    for row in existing {
        if row.is_finalized() {
            finalized.insert(row.yr_qtr, row.clone());
        } else {
            open.insert(row.yr_qtr, row.clone());
        }
    }
    (finalized, open)
}

/// Merges `incoming` into `existing` without touching finalized quarters.
pub fn merge_historical(existing: &[HistoricalRow], incoming: Vec<HistoricalRow>) -> HistoricalMerge {
    let (finalized, mut open) = partition_finalized(existing);
    let mut merge = HistoricalMerge::default();

    let (discarded, surviving): (Vec<_>, Vec<_>) = incoming
        .into_iter()
        .partition(|row| finalized.contains_key(&row.yr_qtr));
    merge.protected = discarded.len();

    for row in surviving {
        if open.insert(row.yr_qtr, row).is_some() {
            merge.replaced += 1;
        } else {
            merge.appended += 1;
        }
    }

    let mut combined = finalized;
    combined.append(&mut open);
    merge.rows = combined.into_values().collect();
    merge
}
