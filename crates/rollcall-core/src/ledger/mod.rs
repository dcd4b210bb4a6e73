//! Append-only attendance ledger.
//!
//! Rows are never edited or removed. [`AttendanceLedger`] layers the in-run
//! dedup set over a [`LedgerStore`] so each (id, subject, date) key is marked
//! Present at most once per run.

mod csv_store;
mod memory;
mod sqlite_store;

pub use csv_store::CsvLedger;
pub use memory::MemoryLedger;
pub use sqlite_store::SqliteLedger;

use crate::timetable::weekday_name;
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Column order of a persisted ledger row.
pub const COLUMNS: [&str; 7] = ["id", "display_name", "date", "time", "day", "subject", "status"];

/// Time field of synthesized Absent rows.
pub const TIME_NOT_APPLICABLE: &str = "N/A";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Present,
    Absent,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Present => "Present",
            Status::Absent => "Absent",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Present" => Ok(Status::Present),
            "Absent" => Ok(Status::Absent),
            other => Err(LedgerError::Corrupt(format!("unknown status {other:?}"))),
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    #[serde(alias = "RollNo")]
    pub id: String,
    #[serde(alias = "Name")]
    pub display_name: String,
    #[serde(alias = "Date")]
    pub date: NaiveDate,
    /// `HH:MM:SS`, or [`TIME_NOT_APPLICABLE`] for synthesized rows.
    #[serde(alias = "Time")]
    pub time: String,
    #[serde(alias = "Day")]
    pub day: String,
    #[serde(alias = "Subject")]
    pub subject: String,
    #[serde(alias = "Status")]
    pub status: Status,
}

impl AttendanceRecord {
    pub fn present(id: &str, display_name: &str, at: NaiveDateTime, subject: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            date: at.date(),
            time: at.format("%H:%M:%S").to_string(),
            day: weekday_name(at.weekday()).to_string(),
            subject: subject.to_string(),
            status: Status::Present,
        }
    }

    pub fn absent(id: &str, display_name: &str, date: NaiveDate, subject: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            date,
            time: TIME_NOT_APPLICABLE.to_string(),
            day: weekday_name(date.weekday()).to_string(),
            subject: subject.to_string(),
            status: Status::Absent,
        }
    }
}

/// Persistence for ledger rows: read everything, append a batch.
pub trait LedgerStore {
    fn read_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError>;

    /// Append `records` after the current last row, in order.
    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), LedgerError>;

    /// Create an empty store if none exists yet.
    fn ensure_exists(&mut self) -> Result<(), LedgerError> {
        Ok(())
    }

    /// Human-readable location for log lines.
    fn location(&self) -> String;
}

/// Open the store for `path`: SQLite for `.db`/`.sqlite`, CSV otherwise.
pub fn open_store(path: &Path) -> Result<Box<dyn LedgerStore + Send>, LedgerError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("db") | Some("sqlite") | Some("sqlite3") => Ok(Box::new(SqliteLedger::open(path)?)),
        _ => Ok(Box::new(CsvLedger::new(path))),
    }
}

/// What `record_presence` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceOutcome {
    Recorded(AttendanceRecord),
    AlreadyMarked,
}

/// Ledger store plus the dedup set of keys marked this run.
///
/// The date is part of the key so a process left running overnight marks the
/// next day's sessions afresh.
pub struct AttendanceLedger {
    store: Box<dyn LedgerStore + Send>,
    marked: HashSet<(String, String, NaiveDate)>,
}

impl AttendanceLedger {
    pub fn new(store: Box<dyn LedgerStore + Send>) -> Self {
        Self {
            store,
            marked: HashSet::new(),
        }
    }

    /// Add every Present row already persisted for `date` to the dedup set.
    ///
    /// Returns the number of keys added.
    pub fn seed_from_store(&mut self, date: NaiveDate) -> Result<usize, LedgerError> {
        let before = self.marked.len();
        for row in self.store.read_all()? {
            if row.status == Status::Present && row.date == date {
                self.marked.insert((row.id, row.subject, row.date));
            }
        }
        Ok(self.marked.len() - before)
    }

    pub fn is_marked(&self, id: &str, subject: &str, date: NaiveDate) -> bool {
        self.marked
            .contains(&(id.to_string(), subject.to_string(), date))
    }

    /// Mark `id` Present for `subject` at `at`, once per day.
    ///
    /// The key enters the dedup set only after the append succeeds, so a
    /// failed write is retried on the next sighting.
    pub fn record_presence(
        &mut self,
        id: &str,
        display_name: &str,
        at: NaiveDateTime,
        subject: &str,
    ) -> Result<PresenceOutcome, LedgerError> {
        if self.is_marked(id, subject, at.date()) {
            return Ok(PresenceOutcome::AlreadyMarked);
        }

        let record = AttendanceRecord::present(id, display_name, at, subject);
        self.store.append(std::slice::from_ref(&record))?;
        self.marked
            .insert((id.to_string(), subject.to_string(), record.date));

        tracing::info!(id, name = display_name, subject, "marked present");
        Ok(PresenceOutcome::Recorded(record))
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }
}
