use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::commands::CommandReport;
use crate::earn::audit;
use crate::earn::lock::RunLock;
use crate::earn::paths::{EarnPaths, resolve_paths};

pub fn run() -> Result<CommandReport> {
    restore_home(&resolve_paths()?)
}

fn copy_back(backup: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::copy(backup, target).with_context(|| {
        format!("failed to copy {} to {}", backup.display(), target.display())
    })?;
    Ok(())
}

/// Puts the last backups of the ledger and tables back in place.
///
/// Snapshots and archived sources are left as they are; `verify` reports
/// any drift that remains.
pub fn restore_home(paths: &EarnPaths) -> Result<CommandReport> {
    let lock = RunLock::acquire(paths)?;
    let mut report = CommandReport::new("restore");

    let backup = paths.backup_ledger_file();
    if !backup.exists() {
        report.issue(format!("no ledger backup at {}", backup.display()));
        return Ok(report);
    }
    copy_back(&backup, &paths.ledger_file())?;
    report.detail(format!("restored ledger from {}", backup.display()));

    for (label, backup, target) in [
        ("historical", paths.backup_historical_file(), paths.historical_file()),
        ("industry", paths.backup_industry_file(), paths.industry_file()),
    ] {
        if backup.exists() {
            copy_back(&backup, &target)?;
            report.detail(format!("restored {label} table from {}", backup.display()));
        } else {
            report.warn(format!("no {label} table backup; current table kept"));
        }
    }

    audit::append_event(paths, "restore", "ok", &report.details.join("; "))?;
    report.detail(format!("lock={}", lock.path().display()));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_backup_is_reported() {
        let tmp = tempdir().expect("tempdir");
        let report = restore_home(&EarnPaths::under(tmp.path())).expect("restore");
        assert!(!report.ok);
    }

    #[test]
    fn backups_replace_current_files() {
        let tmp = tempdir().expect("tempdir");
        let paths = EarnPaths::under(tmp.path());
        fs::create_dir_all(&paths.backup_dir).expect("mkdir");
        fs::write(paths.backup_ledger_file(), "{\"prev_files\":[]}").expect("write");
        fs::write(paths.backup_historical_file(), "yr_qtr\n").expect("write");
        fs::write(paths.ledger_file(), "{\"prev_files\":[\"x\"]}").expect("write");

        let report = restore_home(&paths).expect("restore");
        assert!(report.ok);
        assert_eq!(
            fs::read_to_string(paths.ledger_file()).expect("read"),
            "{\"prev_files\":[]}"
        );
        assert!(paths.historical_file().exists());
        assert_eq!(report.warnings.len(), 1);
    }
}
