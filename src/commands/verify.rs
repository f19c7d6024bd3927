use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;

use crate::commands::CommandReport;
use crate::earn::ledger::{LedgerRecord, VersionLedger};
use crate::earn::paths::{EarnPaths, resolve_paths};
use crate::earn::snapshot::list_snapshot_files;
use crate::earn::table::{read_historical, read_industry, read_projections};

#[derive(Debug, Clone, Default)]
pub struct VerifyOptions {
    pub strict: bool,
}

pub fn run(opts: &VerifyOptions) -> Result<CommandReport> {
    let mut report = verify_home(&resolve_paths()?)?;
    if opts.strict && !report.warnings.is_empty() {
        report.issue("strict verify failed: warnings present");
    }
    Ok(report)
}

fn check_storage(paths: &EarnPaths, ledger: &VersionLedger, report: &mut CommandReport) -> Result<()> {
    let on_disk = list_snapshot_files(&paths.projections_dir)?
        .into_iter()
        .collect::<BTreeSet<_>>();
    let recorded = ledger.snapshots().values().cloned().collect::<BTreeSet<_>>();

    for missing in recorded.difference(&on_disk) {
        report.issue(format!("snapshot {missing} is recorded but not on disk"));
    }
    for stray in on_disk.difference(&recorded) {
        report.warn(format!("snapshot {stray} is on disk but not recorded"));
    }
    for (period, name) in ledger.snapshots() {
        if ledger.active_for(*period).is_none() {
            report.issue(format!("snapshot for {period} has no active source file"));
        }
        if !on_disk.contains(name) {
            continue;
        }
        match read_projections(&paths.projections_dir.join(name)) {
            Ok(rows) if rows.iter().any(|row| row.date.is_none()) => {
                report.issue(format!("snapshot {name} has undated rows"));
            }
            Ok(_) => {}
            Err(err) => report.issue(format!("snapshot {name} unreadable: {err:#}")),
        }
    }
    for (period, active) in ledger.active_files() {
        if ledger.snapshot_for(*period).is_none() {
            report.warn(format!("active file {} has no snapshot for {period}", active.name));
        }
    }
    Ok(())
}

fn check_tables(paths: &EarnPaths, report: &mut CommandReport) {
    match read_historical(&paths.historical_file()) {
        Ok(rows) => {
            if rows.windows(2).any(|pair| pair[0].yr_qtr >= pair[1].yr_qtr) {
                report.issue("historical table quarters are not unique and ascending");
            }
            if let Some(row) = rows.iter().find(|row| row.date.is_none()) {
                report.issue(format!("historical row {} has no date", row.yr_qtr));
            }
            report.detail(format!("historical_rows={}", rows.len()));
        }
        Err(err) => report.issue(format!("historical table unreadable: {err:#}")),
    }
    match read_industry(&paths.industry_file()) {
        Ok(rows) => {
            if rows.windows(2).any(|pair| pair[0].year <= pair[1].year) {
                report.issue("industry table years are not unique and descending");
            }
            report.detail(format!("industry_rows={}", rows.len()));
        }
        Err(err) => report.issue(format!("industry table unreadable: {err:#}")),
    }
}

pub fn verify_home(paths: &EarnPaths) -> Result<CommandReport> {
    let mut report = CommandReport::new("verify");
    let ledger_path = paths.ledger_file();
    if !ledger_path.exists() {
        report.detail("no ledger yet; nothing to verify");
        check_tables(paths, &mut report);
        return Ok(report);
    }

    let raw = fs::read_to_string(&ledger_path)
        .with_context(|| format!("failed to read {}", ledger_path.display()))?;
    let record: LedgerRecord = match serde_json::from_str(&raw) {
        Ok(record) => record,
        Err(err) => {
            report.issue(format!("ledger is not valid JSON: {err}"));
            return Ok(report);
        }
    };
    for problem in record.consistency_issues() {
        report.issue(problem);
    }
    report.detail(format!(
        "output_proj_files={} proj_yr_qtrs={}",
        record.output_proj_files.len(),
        record.proj_yr_qtrs.len()
    ));

    match VersionLedger::from_record(record) {
        Ok(ledger) => check_storage(paths, &ledger, &mut report)?,
        Err(err) => report.issue(err.to_string()),
    }
    check_tables(paths, &mut report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earn::period::QuarterKey;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn seeded(paths: &EarnPaths) -> VersionLedger {
        let date = NaiveDate::from_ymd_opt(2024, 5, 15).expect("date");
        let mut ledger = VersionLedger::empty();
        ledger.record_accepted(
            "sp-500-eps-est 2024-05-15.xlsx",
            QuarterKey::from_date(date),
            date,
            Some("sp-500-eps-est 2024-05-15.csv"),
        );
        ledger.persist(&paths.ledger_file()).expect("persist");
        ledger
    }

    #[test]
    fn empty_home_verifies() {
        let tmp = tempdir().expect("tempdir");
        let report = verify_home(&EarnPaths::under(tmp.path())).expect("verify");
        assert!(report.ok);
    }

    #[test]
    fn recorded_snapshot_missing_from_disk_is_an_issue() {
        let tmp = tempdir().expect("tempdir");
        let paths = EarnPaths::under(tmp.path());
        seeded(&paths);
        let report = verify_home(&paths).expect("verify");
        assert!(!report.ok);
        assert!(report.issues[0].contains("not on disk"));

        fs::create_dir_all(&paths.projections_dir).expect("mkdir");
        fs::write(paths.projections_dir.join("sp-500-eps-est 2024-05-15.csv"), "yr_qtr\n")
            .expect("write");
        assert!(verify_home(&paths).expect("verify").ok);
    }

    #[test]
    fn unbalanced_snapshot_lists_fail_verification() {
        let tmp = tempdir().expect("tempdir");
        let paths = EarnPaths::under(tmp.path());
        let mut record = seeded(&paths).to_record();
        record.proj_yr_qtrs.push("2024-Q1".to_string());
        fs::write(
            paths.ledger_file(),
            serde_json::to_string(&record).expect("json"),
        )
        .expect("write");

        let report = verify_home(&paths).expect("verify");
        assert!(report.issues.iter().any(|i| i.contains("proj_yr_qtrs has 2")));
    }
}
