//! Decides which newly discovered files take over their quarter.

use crate::earn::ledger::{ConsistencyWarning, VersionLedger};
use crate::earn::period::{QuarterKey, capture_date_from_name};
use chrono::NaiveDate;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub capture_date: NaiveDate,
    pub period: QuarterKey,
}

impl Candidate {
    fn rank(&self) -> (NaiveDate, &str) {
        (self.capture_date, self.name.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    NewPeriod,
    Supersedes { stale_file: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub candidate: Candidate,
    pub disposition: Disposition,
}

impl Accepted {
    pub fn stale_file(&self) -> Option<&str> {
        match &self.disposition {
            Disposition::Supersedes { stale_file } => Some(stale_file),
            Disposition::NewPeriod => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The active file for the quarter is as new or newer.
    NotNewer { active_file: String },
    /// Another file of the same batch won the quarter.
    Outranked { winner: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ignorable {
    pub candidate: Candidate,
    pub reason: IgnoreReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Oldest capture date first.
    pub accepted: Vec<Accepted>,
    pub ignorable: Vec<Ignorable>,
    pub unparseable: Vec<String>,
}

/// Partitions a batch of new file names against the ledger.
///
/// Within one quarter the latest capture date wins; equal dates fall back to
/// the lexicographically largest name.
pub fn resolve(new_files: &[String], ledger: &VersionLedger) -> Resolution {
    let mut resolution = Resolution::default();
    let mut groups: BTreeMap<QuarterKey, Vec<Candidate>> = BTreeMap::new();

    for name in new_files {
        match capture_date_from_name(name) {
            Ok(capture_date) => {
                let period = QuarterKey::from_date(capture_date);
                groups.entry(period).or_default().push(Candidate {
                    name: name.clone(),
                    capture_date,
                    period,
                });
            }
            Err(_) => resolution.unparseable.push(name.clone()),
        }
    }

    for (period, mut group) in groups {
        group.sort_by(|a, b| a.rank().cmp(&b.rank()));
        let Some(winner) = group.pop() else {
            continue;
        };
        for loser in group {
            resolution.ignorable.push(Ignorable {
                candidate: loser,
                reason: IgnoreReason::Outranked {
                    winner: winner.name.clone(),
                },
            });
        }

        match ledger.active_for(period) {
            None => resolution.accepted.push(Accepted {
                candidate: winner,
                disposition: Disposition::NewPeriod,
            }),
            Some(active) if active.capture_date < winner.capture_date => {
                resolution.accepted.push(Accepted {
                    candidate: winner,
                    disposition: Disposition::Supersedes {
                        stale_file: active.name.clone(),
                    },
                })
            }
            Some(active) => resolution.ignorable.push(Ignorable {
                candidate: winner,
                reason: IgnoreReason::NotNewer {
                    active_file: active.name.clone(),
                },
            }),
        }
    }

    resolution
        .accepted
        .sort_by(|a, b| a.candidate.rank().cmp(&b.candidate.rank()));
    resolution
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Retirement {
    pub stale_snapshots: Vec<String>,
    pub warnings: Vec<ConsistencyWarning>,
}

/// Retires the ledger entries of every superseded file among `winners`.
///
/// The stale snapshot names are returned for deletion at commit time.
pub fn retire_superseded<'a, I>(ledger: &mut VersionLedger, winners: I) -> Retirement
where
    I: IntoIterator<Item = &'a Accepted>,
{
    let mut retirement = Retirement::default();
    for accepted in winners {
        let Some(stale_file) = accepted.stale_file() else {
            continue;
        };
        let retired = ledger.record_superseded(stale_file, accepted.candidate.period);
        retirement.stale_snapshots.extend(retired.stale_snapshot);
        retirement.warnings.extend(retired.warnings);
    }
    retirement
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn ledger_with(active: &str, snapshot: &str) -> VersionLedger {
        let mut ledger = VersionLedger::empty();
        let date = capture_date_from_name(active).expect("date");
        ledger.record_accepted(active, QuarterKey::from_date(date), date, Some(snapshot));
        ledger
    }

    #[test]
    fn empty_ledger_accepts_one_file_per_quarter() {
        let batch = names(&[
            "sp-500-eps-est 2024-05-01.xlsx",
            "sp-500-eps-est 2024-05-15.xlsx",
            "sp-500-eps-est 2024-02-01.xlsx",
        ]);
        let out = resolve(&batch, &VersionLedger::empty());

        let accepted = out
            .accepted
            .iter()
            .map(|a| a.candidate.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            accepted,
            vec!["sp-500-eps-est 2024-02-01.xlsx", "sp-500-eps-est 2024-05-15.xlsx"]
        );
        assert!(out.accepted.iter().all(|a| a.disposition == Disposition::NewPeriod));
        assert_eq!(out.ignorable.len(), 1);
        assert_eq!(
            out.ignorable[0].reason,
            IgnoreReason::Outranked {
                winner: "sp-500-eps-est 2024-05-15.xlsx".into()
            }
        );
    }

    #[test]
    fn later_capture_date_supersedes_active_file() {
        let ledger = ledger_with(
            "sp-500-eps-est 2024-05-01.xlsx",
            "sp-500-eps-est 2024-05-01.csv",
        );
        let out = resolve(&names(&["sp-500-eps-est 2024-05-15.xlsx"]), &ledger);
        assert_eq!(out.accepted.len(), 1);
        assert_eq!(
            out.accepted[0].stale_file(),
            Some("sp-500-eps-est 2024-05-01.xlsx")
        );
    }

    #[test]
    fn older_or_equal_capture_date_is_ignorable() {
        let ledger = ledger_with(
            "sp-500-eps-est 2024-05-15.xlsx",
            "sp-500-eps-est 2024-05-15.csv",
        );
        let out = resolve(
            &names(&["sp-500-eps-est 2024-05-15 (1).xlsx"]),
            &ledger,
        );
        assert!(out.accepted.is_empty());
        assert_eq!(
            out.ignorable[0].reason,
            IgnoreReason::NotNewer {
                active_file: "sp-500-eps-est 2024-05-15.xlsx".into()
            }
        );

        let out = resolve(&names(&["sp-500-eps-est 2024-04-02.xlsx"]), &ledger);
        assert!(out.accepted.is_empty());
        assert_eq!(out.ignorable.len(), 1);
    }

    #[test]
    fn equal_dates_pick_largest_name() {
        let batch = names(&[
            "sp-500-eps-est 2024-05-15 a.xlsx",
            "sp-500-eps-est 2024-05-15 b.xlsx",
        ]);
        let first = resolve(&batch, &VersionLedger::empty());
        let mut reversed = batch.clone();
        reversed.reverse();
        let second = resolve(&reversed, &VersionLedger::empty());
        assert_eq!(first.accepted, second.accepted);
        assert_eq!(
            first.accepted[0].candidate.name,
            "sp-500-eps-est 2024-05-15 b.xlsx"
        );
    }

    #[test]
    fn undated_names_are_set_aside() {
        let out = resolve(&names(&["sp-500-eps-est final.xlsx"]), &VersionLedger::empty());
        assert_eq!(out.unparseable, vec!["sp-500-eps-est final.xlsx"]);
        assert!(out.accepted.is_empty());
    }

    #[test]
    fn retirement_collects_stale_snapshots() {
        let mut ledger = ledger_with(
            "sp-500-eps-est 2024-05-01.xlsx",
            "sp-500-eps-est 2024-05-01.csv",
        );
        let out = resolve(&names(&["sp-500-eps-est 2024-05-15.xlsx"]), &ledger);
        let retirement = retire_superseded(&mut ledger, &out.accepted);
        assert_eq!(
            retirement.stale_snapshots,
            vec!["sp-500-eps-est 2024-05-01.csv"]
        );
        assert!(retirement.warnings.is_empty());
        assert!(ledger.snapshots().is_empty());
    }
}
