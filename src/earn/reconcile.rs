//! One `update` run.
//!
//! Everything up to the commit stage works on in-memory values. The commit
//! stage then writes, in order: ledger backup and both tables (only when a
//! file was merged), snapshots, stale snapshot deletions, archive moves, and
//! the ledger. The ledger and table backups therefore always come from the
//! same run.

use crate::earn::archive::{archive_sources, move_file};
use crate::earn::audit;
use crate::earn::config::EarnConfig;
use crate::earn::extract::{HistoricalExtract, SourceExtractor};
use crate::earn::historical::{
    guard_capture_dates, join_extractions, merge_historical, quarterly_real_rates,
};
use crate::earn::industry::{attach_year_end_rates, merge_industry};
use crate::earn::ledger::{LedgerSources, VersionLedger};
use crate::earn::lock::RunLock;
use crate::earn::paths::EarnPaths;
use crate::earn::period::QuarterKey;
use crate::earn::resolver::{Accepted, IgnoreReason, resolve, retire_superseded};
use crate::earn::snapshot::{ProjectionSnapshot, build_snapshot, delete_snapshot, write_snapshot};
use crate::earn::table::{
    IndustryRow, backup_table, read_historical, read_industry, write_historical, write_industry,
};
use crate::earn::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    NothingToDo,
    /// Dry run: the plan was computed and nothing was written.
    Planned,
    Committed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedFile {
    pub file: String,
    pub period: QuarterKey,
    pub snapshot: String,
    pub superseded: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFile {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeCounts {
    pub rows: usize,
    pub replaced: usize,
    pub appended: usize,
    pub protected: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub reason: Option<String>,
    pub discovered: Vec<String>,
    pub accepted: Vec<AcceptedFile>,
    pub ignorable: Vec<String>,
    pub failed_to_read: Vec<FailedFile>,
    pub warnings: Vec<String>,
    pub historical: MergeCounts,
    pub industry: MergeCounts,
    pub retired_snapshots: Vec<String>,
    pub archived: Vec<String>,
}

impl RunOutcome {
    fn new(status: RunStatus) -> Self {
        Self {
            status,
            reason: None,
            discovered: Vec::new(),
            accepted: Vec::new(),
            ignorable: Vec::new(),
            failed_to_read: Vec::new(),
            warnings: Vec::new(),
            historical: MergeCounts::default(),
            industry: MergeCounts::default(),
            retired_snapshots: Vec::new(),
            archived: Vec::new(),
        }
    }

    fn nothing_to_do(reason: impl Into<String>) -> Self {
        let mut out = Self::new(RunStatus::NothingToDo);
        out.reason = Some(reason.into());
        out
    }

    fn warn(&mut self, event: WarnEvent<'_>) {
        warn::emit(event);
        let subject = [event.file, event.period]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if subject.is_empty() {
            self.warnings.push(event.reason.to_string());
        } else {
            self.warnings.push(format!("{subject}: {}", event.reason));
        }
    }

    fn fail(&mut self, stage: &str, file: &str, reason: String) {
        warn::emit(WarnEvent {
            code: "READ_FAILED",
            stage,
            action: "skip",
            file,
            retry: "next_run",
            reason: &reason,
            ..WarnEvent::default()
        });
        self.failed_to_read.push(FailedFile {
            file: file.to_string(),
            reason,
        });
    }
}

/// Source workbook names in `input_dir`, sorted ascending.
pub fn list_source_files(input_dir: &Path, config: &EarnConfig) -> Result<Vec<String>> {
    if !input_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in
        fs::read_dir(input_dir).with_context(|| format!("failed to read {}", input_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if config.matches_source(&name) {
            out.push(name);
        }
    }
    out.sort();
    Ok(out)
}

/// A winner whose workbook yielded all three parts.
struct ReadyFile<'a> {
    winner: &'a Accepted,
    snapshot: ProjectionSnapshot,
    historical: HistoricalExtract,
    industry: Vec<IndustryRow>,
}

pub struct Reconciler<E> {
    paths: EarnPaths,
    config: EarnConfig,
    extractor: E,
}

impl<E: SourceExtractor> Reconciler<E> {
    pub fn new(paths: EarnPaths, config: EarnConfig, extractor: E) -> Self {
        Self {
            paths,
            config,
            extractor,
        }
    }

    fn audit(&self, opts: &RunOptions, phase: &str, status: &str, message: &str) -> Result<()> {
        if opts.dry_run {
            return Ok(());
        }
        audit::append_event(&self.paths, phase, status, message)
    }

    fn source_path(&self, name: &str) -> std::path::PathBuf {
        self.paths.input_dir.join(name)
    }

    fn load_real_rates(&self, outcome: &mut RunOutcome) -> BTreeMap<QuarterKey, f64> {
        let name = &self.config.input.real_rate_file;
        let path = self.source_path(name);
        if !path.exists() {
            outcome.warn(WarnEvent {
                code: "RATE_FILE_MISSING",
                stage: "merge",
                action: "null_rates",
                file: name,
                reason: "real rate workbook not found; real_int_rate stays null",
                ..WarnEvent::default()
            });
            return BTreeMap::new();
        }
        match self.extractor.real_rates(&path) {
            Ok(observations) => quarterly_real_rates(&observations),
            Err(err) => {
                let err = format!("{err:#}");
                outcome.warn(WarnEvent {
                    code: "RATE_FILE_UNREADABLE",
                    stage: "merge",
                    action: "null_rates",
                    file: name,
                    reason: "real rate workbook could not be read",
                    err: &err,
                    ..WarnEvent::default()
                });
                BTreeMap::new()
            }
        }
    }

    fn read_winner<'a>(
        &self,
        winner: &'a Accepted,
    ) -> Result<ReadyFile<'a>, (&'static str, String)> {
        let path = self.source_path(&winner.candidate.name);
        let projections = self
            .extractor
            .projections(&path)
            .map_err(|err| ("projections", format!("{err:#}")))?;
        let snapshot = build_snapshot(
            &self.config.input.snapshot_prefix,
            winner.candidate.capture_date,
            projections,
        )
        .map_err(|rejection| ("projections", rejection.to_string()))?;
        let historical = self
            .extractor
            .historical(&path)
            .map_err(|err| ("historical", format!("{err:#}")))?;
        let industry = self
            .extractor
            .industry(&path)
            .map_err(|err| ("industry", format!("{err:#}")))?;
        Ok(ReadyFile {
            winner,
            snapshot,
            historical,
            industry,
        })
    }

    /// Reads every part of each winner. Winners that fail any part drop out
    /// of the run and stay unknown, so the next run retries them.
    fn read_winners<'a>(
        &self,
        accepted: &'a [Accepted],
        outcome: &mut RunOutcome,
    ) -> Vec<ReadyFile<'a>> {
        let mut ready = Vec::new();
        for winner in accepted {
            match self.read_winner(winner) {
                Ok(file) => ready.push(file),
                Err((stage, reason)) => outcome.fail(stage, &winner.candidate.name, reason),
            }
        }
        ready
    }

    pub fn run(&self, opts: &RunOptions) -> Result<RunOutcome> {
        let _lock = if opts.dry_run {
            None
        } else {
            Some(RunLock::acquire(&self.paths)?)
        };

        let ledger_path = self.paths.ledger_file();
        let mut ledger = VersionLedger::load_or_init(&ledger_path)?;

        let listing = list_source_files(&self.paths.input_dir, &self.config)?;
        if listing.is_empty() {
            let reason = format!("no eligible files in {}", self.paths.input_dir.display());
            self.audit(opts, "discover", "skip", &reason)?;
            return Ok(RunOutcome::nothing_to_do(reason));
        }
        let new_files = ledger.discover_new_files(listing);
        if new_files.is_empty() {
            let reason = "all files have been read previously".to_string();
            self.audit(opts, "discover", "skip", &reason)?;
            return Ok(RunOutcome::nothing_to_do(reason));
        }
        self.audit(
            opts,
            "discover",
            "ok",
            &format!("{} new files: {}", new_files.len(), new_files.join(", ")),
        )?;

        let mut outcome = RunOutcome::new(if opts.dry_run {
            RunStatus::Planned
        } else {
            RunStatus::Committed
        });
        outcome.discovered = new_files.clone();

        ledger.sources = LedgerSources {
            sp: self.config.sources.sp_url.clone(),
            tips: self.config.sources.tips_url.clone(),
        };

        let resolution = resolve(&new_files, &ledger);
        for name in &resolution.unparseable {
            outcome.fail("resolve", name, "no capture date in file name".to_string());
        }
        for ignorable in &resolution.ignorable {
            let name = &ignorable.candidate.name;
            let reason = match &ignorable.reason {
                IgnoreReason::NotNewer { active_file } => format!("{active_file} is as new"),
                IgnoreReason::Outranked { winner } => format!("outranked by {winner}"),
            };
            warn::emit(WarnEvent {
                code: "SOURCE_IGNORED",
                stage: "resolve",
                action: "record_known",
                file: name,
                period: &ignorable.candidate.period.to_string(),
                reason: &reason,
                ..WarnEvent::default()
            });
            ledger.record_known(name);
            outcome.ignorable.push(name.clone());
        }
        self.audit(
            opts,
            "resolve",
            "ok",
            &format!(
                "{} accepted, {} ignorable, {} undated",
                resolution.accepted.len(),
                resolution.ignorable.len(),
                resolution.unparseable.len()
            ),
        )?;

        let ready = self.read_winners(&resolution.accepted, &mut outcome);
        for file in &ready {
            let name = &file.winner.candidate.name;
            if let Err(err) = guard_capture_dates(name, &file.historical) {
                self.audit(opts, "merge", "abort", &err.to_string())?;
                return Err(err.into());
            }
        }

        let historical_path = self.paths.historical_file();
        let industry_path = self.paths.industry_file();
        let mut historical = read_historical(&historical_path)?;
        let mut industry = read_industry(&industry_path)?;

        if !ready.is_empty() {
            let rates = self.load_real_rates(&mut outcome);
            for file in &ready {
                let incoming = join_extractions(&file.historical, &rates);
                let merge = merge_historical(&historical, incoming);
                outcome.historical.replaced += merge.replaced;
                outcome.historical.appended += merge.appended;
                outcome.historical.protected += merge.protected;
                historical = merge.rows;
            }

            for file in &ready {
                let mut incoming = file.industry.clone();
                attach_year_end_rates(&mut incoming, &historical);
                let merge = merge_industry(&industry, incoming);
                outcome.industry.replaced += merge.replaced;
                outcome.industry.appended += merge.appended;
                outcome.industry.protected += merge.protected;
                industry = merge.rows;
            }
        }
        outcome.historical.rows = historical.len();
        outcome.industry.rows = industry.len();

        let retirement = retire_superseded(&mut ledger, ready.iter().map(|file| file.winner));
        for warning in &retirement.warnings {
            outcome.warn(WarnEvent {
                code: "LEDGER_DRIFT",
                stage: "resolve",
                action: "continue",
                period: &warning.period.to_string(),
                reason: &warning.message,
                ..WarnEvent::default()
            });
        }
        let mut stale = retirement.stale_snapshots;

        for file in &ready {
            let (winner, snapshot) = (file.winner, &file.snapshot);
            let candidate = &winner.candidate;
            let displaced = ledger.record_accepted(
                &candidate.name,
                candidate.period,
                candidate.capture_date,
                Some(&snapshot.file_name),
            );
            if let Some(displaced) = displaced {
                outcome.warn(WarnEvent {
                    code: "LEDGER_DRIFT",
                    stage: "resolve",
                    action: "retire_snapshot",
                    file: &displaced,
                    period: &candidate.period.to_string(),
                    reason: "snapshot recorded without an active file",
                    ..WarnEvent::default()
                });
                stale.push(displaced);
            }
            outcome.accepted.push(AcceptedFile {
                file: candidate.name.clone(),
                period: candidate.period,
                snapshot: snapshot.file_name.clone(),
                superseded: winner.stale_file().map(str::to_string),
            });
        }
        stale.retain(|name| ready.iter().all(|file| &file.snapshot.file_name != name));
        outcome.retired_snapshots = stale;

        if let Some(file) = ready.last() {
            ledger.latest_used_file = file.winner.candidate.name.clone();
        }
        self.audit(
            opts,
            "merge",
            "ok",
            &format!(
                "{} files merged, {} failed to read",
                ready.len(),
                outcome.failed_to_read.len()
            ),
        )?;

        if opts.dry_run {
            return Ok(outcome);
        }

        if !ready.is_empty() {
            VersionLedger::backup(&ledger_path, &self.paths.backup_ledger_file())?;
            backup_table(&historical_path, &self.paths.backup_historical_file())?;
            backup_table(&industry_path, &self.paths.backup_industry_file())?;
            self.audit(opts, "backup", "ok", "ledger and tables backed up")?;

            write_historical(&historical_path, &historical)?;
            write_industry(&industry_path, &industry)?;
            for file in &ready {
                write_snapshot(&self.paths.projections_dir, &file.snapshot)?;
            }
        }

        for name in outcome.retired_snapshots.clone() {
            if !delete_snapshot(&self.paths.projections_dir, &name)? {
                outcome.warn(WarnEvent {
                    code: "SNAPSHOT_MISSING",
                    stage: "commit",
                    action: "continue",
                    file: &name,
                    reason: "retired snapshot was not on disk",
                    ..WarnEvent::default()
                });
            }
        }

        let mut to_archive = ready
            .iter()
            .map(|file| file.winner.candidate.name.clone())
            .collect::<Vec<_>>();
        to_archive.extend(outcome.ignorable.iter().cloned());
        let archived = archive_sources(&self.paths.input_dir, &self.paths.archive_dir, &to_archive)?;
        for missing in &archived.missing {
            outcome.warn(WarnEvent {
                code: "ARCHIVE_SOURCE_MISSING",
                stage: "commit",
                action: "continue",
                file: &missing.display().to_string(),
                reason: "source file vanished before archiving",
                ..WarnEvent::default()
            });
        }
        outcome.archived = to_archive
            .into_iter()
            .filter(|name| archived.moved.iter().any(|p| p.ends_with(name)))
            .collect();

        if self.config.archive.real_rate_file && !ready.is_empty() {
            let name = &self.config.input.real_rate_file;
            let from = self.source_path(name);
            if from.exists() {
                move_file(&from, &self.paths.archive_dir.join(name))?;
                outcome.archived.push(name.clone());
            }
        }

        ledger.persist(&ledger_path)?;
        self.audit(
            opts,
            "commit",
            "ok",
            &format!(
                "{} snapshots written, {} retired, {} archived",
                ready.len(),
                outcome.retired_snapshots.len(),
                outcome.archived.len()
            ),
        )?;
        Ok(outcome)
    }
}
