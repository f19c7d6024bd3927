//! The persisted record of processing state.
//!
//! On disk the ledger keeps the flat list layout of `record_dict.json`. In
//! memory the lists become maps keyed by quarter so that the one-active-file
//! per period rule holds by construction.

use crate::earn::period::{QuarterKey, capture_date_from_name, quarter_key_for_name};
use crate::error::EarnError;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSources {
    #[serde(rename = "s&p", default)]
    pub sp: String,
    #[serde(default)]
    pub tips: String,
}

/// Wire form of the ledger file. All four lists are written sorted descending.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerRecord {
    pub sources: LedgerSources,
    pub latest_used_file: String,
    pub proj_yr_qtrs: Vec<String>,
    pub prev_used_files: Vec<String>,
    pub output_proj_files: Vec<String>,
    pub prev_files: Vec<String>,
}

impl LedgerRecord {
    /// Problems a raw record has that loading would either reject or repair.
    pub fn consistency_issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.output_proj_files.len() != self.proj_yr_qtrs.len() {
            issues.push(format!(
                "output_proj_files has {} entries but proj_yr_qtrs has {}",
                self.output_proj_files.len(),
                self.proj_yr_qtrs.len()
            ));
        }
        let known = self.prev_files.iter().collect::<BTreeSet<_>>();
        for used in &self.prev_used_files {
            if !known.contains(used) {
                issues.push(format!("active file {used} is missing from prev_files"));
            }
        }
        for (label, list) in [
            ("prev_files", &self.prev_files),
            ("prev_used_files", &self.prev_used_files),
            ("output_proj_files", &self.output_proj_files),
            ("proj_yr_qtrs", &self.proj_yr_qtrs),
        ] {
            if list.windows(2).any(|pair| pair[0] < pair[1]) {
                issues.push(format!("{label} is not sorted descending"));
            }
        }
        issues
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveFile {
    pub name: String,
    pub capture_date: NaiveDate,
}

/// Non-fatal drift between the ledger and what a retirement expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    pub period: QuarterKey,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retired {
    pub stale_snapshot: Option<String>,
    pub warnings: Vec<ConsistencyWarning>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionLedger {
    pub sources: LedgerSources,
    pub latest_used_file: String,
    known_files: BTreeSet<String>,
    active_by_period: BTreeMap<QuarterKey, ActiveFile>,
    snapshots: BTreeMap<QuarterKey, String>,
}

impl VersionLedger {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Reads the ledger at `path`; a missing file is a first run, not an error.
    pub fn load_or_init(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::empty());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let record: LedgerRecord = serde_json::from_str(&raw).map_err(|err| {
            EarnError::LedgerCorrupt(format!("{} is not valid JSON: {err}", path.display()))
        })?;
        Self::from_record(record).with_context(|| format!("invalid ledger {}", path.display()))
    }

    pub fn from_record(record: LedgerRecord) -> Result<Self, EarnError> {
        let mut active_by_period = BTreeMap::new();
        for name in record.prev_used_files {
            let capture_date = capture_date_from_name(&name).map_err(|_| {
                EarnError::LedgerCorrupt(format!("active file has no capture date: {name}"))
            })?;
            let period = QuarterKey::from_date(capture_date);
            let entry = ActiveFile {
                name: name.clone(),
                capture_date,
            };
            if let Some(existing) = active_by_period.insert(period, entry) {
                return Err(EarnError::LedgerCorrupt(format!(
                    "two active files for {period}: {} and {name}",
                    existing.name
                )));
            }
        }

        let mut snapshots = BTreeMap::new();
        for name in record.output_proj_files {
            let period = quarter_key_for_name(&name).map_err(|_| {
                EarnError::LedgerCorrupt(format!("snapshot has no capture date: {name}"))
            })?;
            if let Some(existing) = snapshots.insert(period, name.clone()) {
                return Err(EarnError::LedgerCorrupt(format!(
                    "two snapshots for {period}: {existing} and {name}"
                )));
            }
        }

        let mut known_files = record.prev_files.into_iter().collect::<BTreeSet<_>>();
        known_files.extend(active_by_period.values().map(|a| a.name.clone()));

        Ok(Self {
            sources: record.sources,
            latest_used_file: record.latest_used_file,
            known_files,
            active_by_period,
            snapshots,
        })
    }

    pub fn to_record(&self) -> LedgerRecord {
        let mut prev_used_files = self
            .active_by_period
            .values()
            .map(|a| a.name.clone())
            .collect::<Vec<_>>();
        prev_used_files.sort_by(|a, b| b.cmp(a));

        let mut output_proj_files = self.snapshots.values().cloned().collect::<Vec<_>>();
        output_proj_files.sort_by(|a, b| b.cmp(a));

        LedgerRecord {
            sources: self.sources.clone(),
            latest_used_file: self.latest_used_file.clone(),
            proj_yr_qtrs: self.snapshots.keys().rev().map(ToString::to_string).collect(),
            prev_used_files,
            output_proj_files,
            prev_files: self.known_files.iter().rev().cloned().collect(),
        }
    }

    /// Names in `listing` that the ledger has never seen, sorted ascending.
    pub fn discover_new_files<I, S>(&self, listing: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        listing
            .into_iter()
            .map(Into::into)
            .filter(|name: &String| !self.is_known(name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Copies the ledger file at `current` byte for byte to `backup`.
    ///
    /// Must run before the ledger file is rewritten. On a first run there is
    /// no file yet and an empty record is written instead.
    pub fn backup(current: &Path, backup: &Path) -> Result<()> {
        if !current.exists() {
            return write_atomic(backup, &LedgerRecord::default());
        }
        if let Some(parent) = backup.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(current, backup).with_context(|| {
            format!("failed to copy {} to {}", current.display(), backup.display())
        })?;
        Ok(())
    }

    pub fn record_known(&mut self, file: &str) {
        self.known_files.insert(file.to_string());
    }

    /// Makes `file` the active file for `period`.
    ///
    /// Returns a snapshot name that the new snapshot displaced, which only
    /// happens when the ledger had drifted (a snapshot with no active file).
    pub fn record_accepted(
        &mut self,
        file: &str,
        period: QuarterKey,
        capture_date: NaiveDate,
        snapshot: Option<&str>,
    ) -> Option<String> {
        self.known_files.insert(file.to_string());
        self.active_by_period.insert(
            period,
            ActiveFile {
                name: file.to_string(),
                capture_date,
            },
        );
        let snapshot = snapshot?;
        self.snapshots
            .insert(period, snapshot.to_string())
            .filter(|previous| previous != snapshot)
    }

    /// Retires the entries for `period` that `stale_file` owned.
    ///
    /// Absent or mismatched entries are reported as warnings; the caller
    /// deletes the returned snapshot from storage.
    pub fn record_superseded(&mut self, stale_file: &str, period: QuarterKey) -> Retired {
        let mut retired = Retired::default();
        match self.active_by_period.remove(&period) {
            Some(active) if active.name == stale_file => {}
            Some(active) => retired.warnings.push(ConsistencyWarning {
                period,
                message: format!(
                    "expected {stale_file} to be active for {period}, found {}",
                    active.name
                ),
            }),
            None => retired.warnings.push(ConsistencyWarning {
                period,
                message: format!("no active file recorded for {period} (expected {stale_file})"),
            }),
        }
        retired.stale_snapshot = self.snapshots.remove(&period);
        if retired.stale_snapshot.is_none() {
            retired.warnings.push(ConsistencyWarning {
                period,
                message: format!("no projection snapshot recorded for {period}"),
            });
        }
        retired
    }

    /// Writes the full ledger back. Called once, at the end of a successful run.
    pub fn persist(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_record())
    }

    pub fn is_known(&self, file: &str) -> bool {
        self.known_files.contains(file)
    }

    pub fn active_for(&self, period: QuarterKey) -> Option<&ActiveFile> {
        self.active_by_period.get(&period)
    }

    pub fn snapshot_for(&self, period: QuarterKey) -> Option<&str> {
        self.snapshots.get(&period).map(String::as_str)
    }

    pub fn known_files(&self) -> &BTreeSet<String> {
        &self.known_files
    }

    pub fn active_files(&self) -> &BTreeMap<QuarterKey, ActiveFile> {
        &self.active_by_period
    }

    pub fn snapshots(&self) -> &BTreeMap<QuarterKey, String> {
        &self.snapshots
    }
}

fn write_atomic(path: &Path, record: &LedgerRecord) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;

    let data = serde_json::to_string_pretty(record)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage {}", path.display()))?;
    tmp.write_all(data.as_bytes())?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn q(key: &str) -> QuarterKey {
        key.parse().expect("quarter key")
    }

    fn seeded() -> VersionLedger {
        let mut ledger = VersionLedger::empty();
        ledger.record_accepted(
            "sp-500-eps-est 2024-05-01.xlsx",
            q("2024-Q2"),
            date(2024, 5, 1),
            Some("sp-500-eps-est 2024-05-01.csv"),
        );
        ledger.record_accepted(
            "sp-500-eps-est 2024-02-10.xlsx",
            q("2024-Q1"),
            date(2024, 2, 10),
            Some("sp-500-eps-est 2024-02-10.csv"),
        );
        ledger.record_known("sp-500-eps-est 2024-01-05.xlsx");
        ledger
    }

    #[test]
    fn missing_file_loads_as_empty_ledger() {
        let tmp = tempdir().expect("tempdir");
        let ledger = VersionLedger::load_or_init(&tmp.path().join("record_dict.json"))
            .expect("first run is not an error");
        assert_eq!(ledger, VersionLedger::empty());
        assert!(ledger.known_files().is_empty());
    }

    #[test]
    fn record_lists_are_sorted_descending() {
        let record = seeded().to_record();
        assert_eq!(
            record.prev_files,
            vec![
                "sp-500-eps-est 2024-05-01.xlsx",
                "sp-500-eps-est 2024-02-10.xlsx",
                "sp-500-eps-est 2024-01-05.xlsx",
            ]
        );
        assert_eq!(record.proj_yr_qtrs, vec!["2024-Q2", "2024-Q1"]);
        assert_eq!(record.output_proj_files.len(), record.proj_yr_qtrs.len());
        assert!(record.consistency_issues().is_empty());
    }

    #[test]
    fn persist_then_load_preserves_state() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("record_dict.json");
        let ledger = seeded();
        ledger.persist(&path).expect("persist");
        let loaded = VersionLedger::load_or_init(&path).expect("load");
        assert_eq!(loaded, ledger);
    }

    #[test]
    fn wire_form_keeps_record_dict_field_names() {
        let mut ledger = seeded();
        ledger.sources.sp = "sp-url".into();
        let json = serde_json::to_value(ledger.to_record()).expect("json");
        assert_eq!(json["sources"]["s&p"], "sp-url");
        assert!(json.get("prev_used_files").is_some());
        assert!(json.get("latest_used_file").is_some());
    }

    #[test]
    fn discover_returns_only_unseen_names() {
        let ledger = seeded();
        let found = ledger.discover_new_files([
            "sp-500-eps-est 2024-05-01.xlsx",
            "sp-500-eps-est 2024-06-01.xlsx",
            "sp-500-eps-est 2024-01-05.xlsx",
        ]);
        assert_eq!(found, vec!["sp-500-eps-est 2024-06-01.xlsx"]);
        assert!(ledger.discover_new_files(Vec::<String>::new()).is_empty());
    }

    #[test]
    fn superseded_entry_returns_its_snapshot() {
        let mut ledger = seeded();
        let retired = ledger.record_superseded("sp-500-eps-est 2024-05-01.xlsx", q("2024-Q2"));
        assert_eq!(
            retired.stale_snapshot.as_deref(),
            Some("sp-500-eps-est 2024-05-01.csv")
        );
        assert!(retired.warnings.is_empty());
        assert!(ledger.active_for(q("2024-Q2")).is_none());
        assert!(ledger.snapshot_for(q("2024-Q2")).is_none());
        assert!(ledger.is_known("sp-500-eps-est 2024-05-01.xlsx"));
    }

    #[test]
    fn superseding_an_absent_entry_only_warns() {
        let mut ledger = seeded();
        let retired = ledger.record_superseded("sp-500-eps-est 2023-11-01.xlsx", q("2023-Q4"));
        assert_eq!(retired.stale_snapshot, None);
        assert_eq!(retired.warnings.len(), 2);
        assert_eq!(ledger.active_files().len(), 2);
    }

    #[test]
    fn accepted_snapshot_reports_displaced_drift() {
        let mut ledger = VersionLedger::empty();
        ledger.snapshots.insert(q("2024-Q3"), "orphan 2024-07-01.csv".into());
        let displaced = ledger.record_accepted(
            "sp-500-eps-est 2024-08-01.xlsx",
            q("2024-Q3"),
            date(2024, 8, 1),
            Some("sp-500-eps-est 2024-08-01.csv"),
        );
        assert_eq!(displaced.as_deref(), Some("orphan 2024-07-01.csv"));
    }

    #[test]
    fn two_active_files_for_one_quarter_is_corrupt() {
        let record = LedgerRecord {
            prev_used_files: vec![
                "sp-500-eps-est 2024-05-15.xlsx".into(),
                "sp-500-eps-est 2024-05-01.xlsx".into(),
            ],
            ..LedgerRecord::default()
        };
        let err = VersionLedger::from_record(record).expect_err("duplicate quarter");
        assert!(matches!(err, EarnError::LedgerCorrupt(_)));
    }

    #[test]
    fn backup_keeps_drift_the_loader_would_repair() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("record_dict.json");
        let backup = tmp.path().join("backup/backup_record_dict.json");
        // active file missing from prev_files, lists unsorted
        let raw = r#"{"prev_used_files":["sp-500-eps-est 2024-05-01.xlsx"],"prev_files":["a","b"]}"#;
        fs::write(&path, raw).expect("write");

        VersionLedger::load_or_init(&path).expect("load");
        VersionLedger::backup(&path, &backup).expect("backup");
        assert_eq!(fs::read_to_string(&backup).expect("backup"), raw);
    }

    #[test]
    fn first_backup_writes_the_empty_ledger() {
        let tmp = tempdir().expect("tempdir");
        let backup = tmp.path().join("backup/backup_record_dict.json");
        VersionLedger::backup(&tmp.path().join("record_dict.json"), &backup).expect("backup");
        let record: LedgerRecord =
            serde_json::from_str(&fs::read_to_string(&backup).expect("read")).expect("json");
        assert_eq!(record, LedgerRecord::default());
    }

    #[test]
    fn unparseable_ledger_carries_the_corrupt_code() {
        use crate::error::{EarnErrorCode, code_of};

        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("record_dict.json");
        fs::write(&path, "{ not json").expect("write");
        let err = VersionLedger::load_or_init(&path).expect_err("corrupt");
        assert_eq!(code_of(&err), Some(EarnErrorCode::E003LedgerCorrupt));
    }
}
