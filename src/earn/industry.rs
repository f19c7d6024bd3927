//! Annual counterpart of the historical merge.

use crate::earn::period::QuarterKey;
use crate::earn::table::{HistoricalRow, IndustryRow};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndustryMerge {
    /// Newest year first, as the industry table is stored.
    pub rows: Vec<IndustryRow>,
    pub replaced: usize,
    pub appended: usize,
    pub protected: usize,
}

/// Sets each row's rate to the fourth-quarter rate of the merged history.
///
/// A year with no fourth-quarter row, or a null rate there, gets null.
pub fn attach_year_end_rates(incoming: &mut [IndustryRow], historical: &[HistoricalRow]) {
    let by_quarter = historical
        .iter()
        .map(|row| (row.yr_qtr, row.real_int_rate))
        .collect::<BTreeMap<QuarterKey, Option<f64>>>();
    for row in incoming.iter_mut() {
        row.real_int_rate = by_quarter.get(&row.year.fourth_quarter()).copied().flatten();
    }
}

pub fn merge_industry(existing: &[IndustryRow], incoming: Vec<IndustryRow>) -> IndustryMerge {
    let mut finalized = BTreeMap::new();
    let mut open = BTreeMap::new();
    for row in existing {
        if row.is_finalized() {
            finalized.insert(row.year, row.clone());
        } else {
            open.insert(row.year, row.clone());
        }
    }

    let mut merge = IndustryMerge::default();
    for row in incoming {
        if finalized.contains_key(&row.year) {
            merge.protected += 1;
            continue;
        }
        if open.insert(row.year, row).is_some() {
            merge.replaced += 1;
        } else {
            merge.appended += 1;
        }
    }

    finalized.append(&mut open);
    merge.rows = finalized.into_values().rev().collect();
    merge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earn::period::YearKey;
    use crate::earn::table::INDUSTRY_FINAL_FIELD;

    fn year_row(year: i32, op: f64, rep: Option<f64>) -> IndustryRow {
        let mut row = IndustryRow::new(YearKey::new(year));
        row.set("SP500_op_eps", Some(op));
        row.set(INDUSTRY_FINAL_FIELD, rep);
        row
    }

    fn hist(key: &str, rate: Option<f64>) -> HistoricalRow {
        let mut row = HistoricalRow::empty(key.parse::<QuarterKey>().expect("key"));
        row.real_int_rate = rate;
        row
    }

    #[test]
    fn year_end_rate_comes_from_fourth_quarter() {
        let history = vec![
            hist("2023-Q3", Some(2.2)),
            hist("2023-Q4", Some(1.72)),
            hist("2024-Q1", Some(1.88)),
        ];
        let mut incoming = vec![year_row(2023, 220.0, None), year_row(2024, 240.0, None)];
        attach_year_end_rates(&mut incoming, &history);
        assert_eq!(incoming[0].real_int_rate, Some(1.72));
        assert_eq!(incoming[1].real_int_rate, None);
    }

    #[test]
    fn finalized_years_survive_and_order_is_descending() {
        let existing = vec![year_row(2022, 200.0, Some(172.8)), year_row(2023, 215.0, None)];
        let incoming = vec![
            year_row(2022, 1.0, Some(1.0)),
            year_row(2023, 220.0, Some(197.9)),
            year_row(2024, 240.0, None),
        ];
        let merge = merge_industry(&existing, incoming);

        let years = merge.rows.iter().map(|r| r.year.year()).collect::<Vec<_>>();
        assert_eq!(years, vec![2024, 2023, 2022]);
        assert_eq!(merge.rows[2], existing[0]);
        assert_eq!(merge.rows[1].value(INDUSTRY_FINAL_FIELD), Some(197.9));
        assert_eq!((merge.protected, merge.replaced, merge.appended), (1, 1, 1));
    }
}
