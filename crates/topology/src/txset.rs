//! Applied-transaction sets and history comparison
//!
//! Each server tags the transactions it originates with its own source UUID
//! and a monotonically increasing sequence number. The set of transactions a
//! server has executed is therefore a map from source UUID to a list of
//! sequence intervals, kept sorted, non-overlapping and coalesced. Two
//! servers are compared by set algebra on these maps.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::TopologyError;

/// A closed interval of transaction sequence numbers from one source.
///
/// A single transaction is an interval with `start == end`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// First sequence number in the interval
    pub start: u64,

    /// Last sequence number in the interval, inclusive
    pub end: u64,
}

impl Interval {
    /// Create an interval; `start` must not exceed `end`
    #[must_use]
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Interval covering a single transaction
    #[must_use]
    pub const fn point(id: u64) -> Self {
        Self { start: id, end: id }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for Interval {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse_num = |part: &str| {
            part.parse::<u64>()
                .map_err(|e| TopologyError::InvalidTransactionSet(format!("'{s}': {e}")))
        };
        let interval = match s.split_once('-') {
            None => Self::point(parse_num(s)?),
            Some((start, end)) => Self::new(parse_num(start)?, parse_num(end)?),
        };
        if interval.start == 0 || interval.start > interval.end {
            return Err(TopologyError::InvalidTransactionSet(format!(
                "malformed interval '{s}'"
            )));
        }
        Ok(interval)
    }
}

/// An interval-compressed set of transaction identifiers across sources.
///
/// Textual form is `SOURCE:1-5:8,OTHER:1-3`, matching what servers report in
/// their `applied_transactions` and `purged_transactions` status variables.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TransactionSet {
    sources: BTreeMap<Uuid, Vec<Interval>>,
}

impl TransactionSet {
    /// The empty set
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
        }
    }

    /// Whether the set contains no transactions at all
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.values().all(Vec::is_empty)
    }

    /// Total number of transactions in the set
    #[must_use]
    pub fn len(&self) -> u64 {
        self.sources
            .values()
            .flatten()
            .map(|iv| iv.end - iv.start + 1)
            .sum()
    }

    /// Add one interval for a source, merging and coalescing as needed
    pub fn insert(&mut self, source: Uuid, interval: Interval) -> &mut Self {
        let intervals = self.sources.entry(source).or_default();
        intervals.push(interval);
        *intervals = normalize(intervals);
        self
    }

    /// Whether a specific transaction is present
    #[must_use]
    pub fn contains(&self, source: &Uuid, id: u64) -> bool {
        self.sources.get(source).is_some_and(|intervals| {
            intervals
                .iter()
                .any(|iv| iv.start <= id && id <= iv.end)
        })
    }

    /// Whether every transaction in `self` is also in `other`
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.sources.iter().all(|(source, intervals)| {
            let Some(theirs) = other.sources.get(source) else {
                return intervals.is_empty();
            };
            intervals
                .iter()
                .all(|iv| covered_by(*iv, theirs))
        })
    }

    /// Transactions in `self` that are not in `other`
    #[must_use]
    pub fn subtract(&self, other: &Self) -> Self {
        let mut out = Self::new();
        for (source, intervals) in &self.sources {
            let theirs = other.sources.get(source).map_or(&[][..], Vec::as_slice);
            let mut remaining: Vec<Interval> = Vec::new();
            for iv in intervals {
                remaining.extend(subtract_one(*iv, theirs));
            }
            if !remaining.is_empty() {
                out.sources.insert(*source, normalize(&remaining));
            }
        }
        out
    }

    /// Whether the two sets share at least one transaction
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.sources.iter().any(|(source, intervals)| {
            other.sources.get(source).is_some_and(|theirs| {
                intervals
                    .iter()
                    .any(|a| theirs.iter().any(|b| a.start <= b.end && b.start <= a.end))
            })
        })
    }

    /// Merge `other` into a copy of `self`
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (source, intervals) in &other.sources {
            for iv in intervals {
                out.insert(*source, *iv);
            }
        }
        out
    }

    /// Iterate over sources and their interval lists
    pub fn iter(&self) -> impl Iterator<Item = (&Uuid, &[Interval])> {
        self.sources.iter().map(|(k, v)| (k, v.as_slice()))
    }
}

/// Sort, merge overlaps, and coalesce adjacent intervals
fn normalize(intervals: &[Interval]) -> Vec<Interval> {
    let mut sorted: Vec<Interval> = intervals.to_vec();
    sorted.sort_by_key(|iv| iv.start);

    let mut out: Vec<Interval> = Vec::with_capacity(sorted.len());
    for iv in sorted {
        match out.last_mut() {
            Some(last) if iv.start <= last.end.saturating_add(1) => {
                last.end = last.end.max(iv.end);
            }
            _ => out.push(iv),
        }
    }
    out
}

fn covered_by(iv: Interval, intervals: &[Interval]) -> bool {
    intervals
        .iter()
        .any(|other| other.start <= iv.start && iv.end <= other.end)
}

/// Remove every part of `iv` covered by `cover`, returning what is left
fn subtract_one(iv: Interval, cover: &[Interval]) -> Vec<Interval> {
    let mut pieces = vec![iv];
    for c in cover {
        let mut next = Vec::with_capacity(pieces.len());
        for p in pieces {
            if c.end < p.start || p.end < c.start {
                next.push(p);
                continue;
            }
            if p.start < c.start {
                next.push(Interval::new(p.start, c.start - 1));
            }
            if c.end < p.end {
                next.push(Interval::new(c.end + 1, p.end));
            }
        }
        pieces = next;
        if pieces.is_empty() {
            break;
        }
    }
    pieces
}

impl fmt::Display for TransactionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (source, intervals) in &self.sources {
            if intervals.is_empty() {
                continue;
            }
            if !first {
                write!(f, ",")?;
            }
            first = false;
            write!(f, "{}", source.hyphenated())?;
            for iv in intervals {
                write!(f, ":{iv}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for TransactionSet {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = Self::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (source, intervals) = part.split_once(':').ok_or_else(|| {
                TopologyError::InvalidTransactionSet(format!("missing intervals in '{part}'"))
            })?;
            let source = Uuid::parse_str(source).map_err(|e| {
                TopologyError::InvalidTransactionSet(format!("bad source uuid in '{part}': {e}"))
            })?;
            for interval_str in intervals.split(':') {
                set.insert(source, interval_str.parse()?);
            }
        }
        Ok(set)
    }
}

/// Outcome of comparing a candidate's applied transactions against a donor's
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum HistoryComparison {
    /// The candidate already has every transaction the donor has
    Identical,

    /// The candidate is missing transactions, all still in the donor's log
    Recoverable,

    /// The donor has purged transactions the candidate would need
    Irrecoverable,
}

/// Compare a candidate's applied set against a donor's applied and purged sets.
///
/// The candidate is [`HistoryComparison::Irrecoverable`] when any transaction
/// it is missing has already been discarded from the donor's log; replaying
/// the log can never close that gap.
#[must_use]
pub fn compare_histories(
    candidate_applied: &TransactionSet,
    donor_applied: &TransactionSet,
    donor_purged: &TransactionSet,
) -> HistoryComparison {
    let missing = donor_applied.subtract(candidate_applied);
    if missing.is_empty() {
        return HistoryComparison::Identical;
    }
    if missing.intersects(donor_purged) {
        return HistoryComparison::Irrecoverable;
    }
    HistoryComparison::Recoverable
}
