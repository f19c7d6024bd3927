use anyhow::Result;

use crate::commands::CommandReport;
use crate::earn::config::load_config;
use crate::earn::paths::resolve_paths;
use crate::earn::reconcile::{MergeCounts, Reconciler, RunOptions, RunOutcome, RunStatus};
use crate::earn::workbook::WorkbookExtractor;

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub dry_run: bool,
}

pub fn run(opts: &UpdateOptions) -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let config = load_config(&paths)?;
    let outcome = Reconciler::new(paths, config, WorkbookExtractor)
        .run(&RunOptions { dry_run: opts.dry_run })?;
    Ok(outcome_report(&outcome))
}

fn counts_line(table: &str, counts: &MergeCounts) -> String {
    format!(
        "{table}: rows={} replaced={} appended={} protected={}",
        counts.rows, counts.replaced, counts.appended, counts.protected
    )
}

pub fn outcome_report(outcome: &RunOutcome) -> CommandReport {
    let mut report = CommandReport::new("update");
    let status = match outcome.status {
        RunStatus::NothingToDo => "nothing_to_do",
        RunStatus::Planned => "dry_run",
        RunStatus::Committed => "committed",
    };
    report.detail(format!("status={status}"));
    if let Some(reason) = &outcome.reason {
        report.detail(reason.clone());
    }
    if outcome.status == RunStatus::NothingToDo {
        report.detail("no data files have been written");
        return report;
    }

    report.detail(format!("discovered={}", outcome.discovered.len()));
    for accepted in &outcome.accepted {
        let mut line = format!(
            "accepted {} period={} snapshot={}",
            accepted.file, accepted.period, accepted.snapshot
        );
        if let Some(stale) = &accepted.superseded {
            line.push_str(&format!(" supersedes={stale}"));
        }
        report.detail(line);
    }
    for name in &outcome.ignorable {
        report.detail(format!("ignorable {name}"));
    }
    report.detail(counts_line("historical", &outcome.historical));
    report.detail(counts_line("industry", &outcome.industry));
    for name in &outcome.retired_snapshots {
        report.detail(format!("retired snapshot {name}"));
    }
    for name in &outcome.archived {
        report.detail(format!("archived {name}"));
    }
    report.detail(format!(
        "{} new input files read and saved, {} files not read",
        outcome.accepted.len(),
        outcome.failed_to_read.len()
    ));

    for failed in &outcome.failed_to_read {
        report.warn(format!("not read: {}: {}", failed.file, failed.reason));
    }
    for warning in &outcome.warnings {
        report.warn(warning.clone());
    }
    report
}
