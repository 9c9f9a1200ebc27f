//! Time series keyed by year or date, with provenance per entry.

use std::cmp::Ordering;
use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, Result};

/// A yearly or dated timestamp. Ordered by decimal year; a `Year` sorts
/// before a `Date` falling on its 1 January.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeKey {
    Year(i32),
    Date(NaiveDate),
}

impl TimeKey {
    /// Fractional year, e.g. 1 July 2021 → ≈ 2021.496.
    pub fn decimal_year(&self) -> f64 {
        match *self {
            TimeKey::Year(y) => y as f64,
            TimeKey::Date(d) => {
                let days = if NaiveDate::from_ymd_opt(d.year(), 2, 29).is_some() { 366.0 } else { 365.0 };
                d.year() as f64 + d.ordinal0() as f64 / days
            }
        }
    }

    pub fn year(&self) -> i32 {
        match *self {
            TimeKey::Year(y) => y,
            TimeKey::Date(d) => d.year(),
        }
    }
}

impl Ord for TimeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.decimal_year().total_cmp(&other.decimal_year()).then_with(|| match (self, other) {
            (TimeKey::Year(_), TimeKey::Date(_)) => Ordering::Less,
            (TimeKey::Date(_), TimeKey::Year(_)) => Ordering::Greater,
            _ => Ordering::Equal,
        })
    }
}

impl PartialOrd for TimeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TimeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeKey::Year(y) => write!(f, "{y}"),
            TimeKey::Date(d) => write!(f, "{d}"),
        }
    }
}

/// Provenance of a value, e.g. `historical` or `imagery`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceTag(pub String);

impl SourceTag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn historical() -> Self {
        Self::new("historical")
    }

    pub fn imagery() -> Self {
        Self::new("imagery")
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub time: TimeKey,
    /// `None` when the period had no usable data.
    pub value: Option<f64>,
    pub source: SourceTag,
}

impl SeriesEntry {
    pub fn new(time: TimeKey, value: Option<f64>, source: SourceTag) -> Self {
        Self { time, value, source }
    }
}

/// Sorted entries with unique time keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SeriesEntry>", into = "Vec<SeriesEntry>")]
pub struct TimeSeries {
    entries: Vec<SeriesEntry>,
}

impl TryFrom<Vec<SeriesEntry>> for TimeSeries {
    type Error = AnalysisError;

    fn try_from(entries: Vec<SeriesEntry>) -> Result<Self> {
        Self::from_entries(entries)
    }
}

impl From<TimeSeries> for Vec<SeriesEntry> {
    fn from(s: TimeSeries) -> Self {
        s.entries
    }
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<SeriesEntry>) -> Result<Self> {
        let mut s = Self::new();
        for e in entries {
            s.insert(e)?;
        }
        Ok(s)
    }

    /// Insert keeping order. A second entry for an existing key is an error.
    pub fn insert(&mut self, entry: SeriesEntry) -> Result<()> {
        if let Some(v) = entry.value {
            if !v.is_finite() {
                return Err(AnalysisError::config(format!("non-finite value {v} at {}", entry.time)));
            }
        }
        match self.entries.binary_search_by(|e| e.time.cmp(&entry.time)) {
            Ok(_) => Err(AnalysisError::config(format!("duplicate time key {}", entry.time))),
            Err(pos) => {
                self.entries.insert(pos, entry);
                Ok(())
            }
        }
    }

    /// Union of two series. Keys present in both are accepted only when the
    /// entries are identical; any disagreement is rejected.
    pub fn merge(&self, other: &TimeSeries) -> Result<TimeSeries> {
        let mut out = self.clone();
        for e in &other.entries {
            match out.get(&e.time) {
                Some(existing) if existing == e => {}
                Some(existing) => {
                    return Err(AnalysisError::config(format!(
                        "conflicting entries at {}: {:?} from '{}' vs {:?} from '{}'",
                        e.time, existing.value, existing.source, e.value, e.source
                    )))
                }
                None => out.insert(e.clone())?,
            }
        }
        Ok(out)
    }

    pub fn get(&self, time: &TimeKey) -> Option<&SeriesEntry> {
        self.entries.binary_search_by(|e| e.time.cmp(time)).ok().map(|i| &self.entries[i])
    }

    pub fn entries(&self) -> &[SeriesEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from one source only.
    pub fn filter_source(&self, source: &SourceTag) -> TimeSeries {
        TimeSeries { entries: self.entries.iter().filter(|e| &e.source == source).cloned().collect() }
    }

    /// `(decimal_year, value)` pairs for every entry that has a value.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.entries.iter().filter_map(|e| e.value.map(|v| (e.time.decimal_year(), v))).collect()
    }
}
