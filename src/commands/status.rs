use anyhow::Result;
use std::env;

use crate::commands::CommandReport;
use crate::earn::config::load_config;
use crate::earn::ledger::VersionLedger;
use crate::earn::paths::{EarnPaths, resolve_paths};
use crate::earn::reconcile::list_source_files;
use crate::earn::table::{read_historical, read_industry};

include!(concat!(env!("OUT_DIR"), "/earn_env_allowlist.rs"));

const RECENT_QUARTERS: usize = 4;

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let mut report = home_status(&paths)?;
    for key in GENERATED_EARN_ENV_ALLOWLIST {
        if env::var_os(key).is_some() {
            report.detail(format!("env {key} is set"));
        }
    }
    Ok(report)
}

pub fn home_status(paths: &EarnPaths) -> Result<CommandReport> {
    let config = load_config(paths)?;
    let mut report = CommandReport::new("status");

    report.detail(format!("home={}", paths.home.display()));
    report.detail(format!("input_dir={}", paths.input_dir.display()));
    report.detail(format!("output_dir={}", paths.output_dir.display()));
    report.detail(format!("backup_dir={}", paths.backup_dir.display()));
    report.detail(format!("archive_dir={}", paths.archive_dir.display()));

    let ledger_path = paths.ledger_file();
    let ledger = if ledger_path.exists() {
        match VersionLedger::load_or_init(&ledger_path) {
            Ok(ledger) => Some(ledger),
            Err(err) => {
                report.issue(format!("ledger unreadable: {err:#}"));
                None
            }
        }
    } else {
        report.detail("ledger=absent (no run recorded yet)");
        Some(VersionLedger::empty())
    };

    if let Some(ledger) = &ledger {
        report.detail(format!("known_files={}", ledger.known_files().len()));
        report.detail(format!("active_files={}", ledger.active_files().len()));
        report.detail(format!("snapshots={}", ledger.snapshots().len()));
        if !ledger.latest_used_file.is_empty() {
            report.detail(format!("latest_used_file={}", ledger.latest_used_file));
        }
        if !ledger.snapshots().is_empty() {
            let recent = ledger
                .snapshots()
                .keys()
                .rev()
                .take(RECENT_QUARTERS)
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            report.detail(format!("recent_quarters={}", recent.join(",")));
        }

        let listing = list_source_files(&paths.input_dir, &config)?;
        let pending = ledger.discover_new_files(listing);
        report.detail(format!("pending_sources={}", pending.len()));
    }

    match read_historical(&paths.historical_file()) {
        Ok(rows) => {
            let finalized = rows.iter().filter(|row| row.is_finalized()).count();
            report.detail(format!("historical_rows={} finalized={finalized}", rows.len()));
        }
        Err(err) => report.issue(format!("historical table unreadable: {err:#}")),
    }
    match read_industry(&paths.industry_file()) {
        Ok(rows) => {
            let finalized = rows.iter().filter(|row| row.is_finalized()).count();
            report.detail(format!("industry_rows={} finalized={finalized}", rows.len()));
            if let (Some(newest), Some(oldest)) = (rows.first(), rows.last()) {
                report.detail(format!(
                    "industry_years={}..{}",
                    oldest.year.year(),
                    newest.year.year()
                ));
            }
        }
        Err(err) => report.issue(format!("industry table unreadable: {err:#}")),
    }

    Ok(report)
}
