//! Absentee reconciliation.
//!
//! After the day's sessions end, every (student, scheduled subject) pair with
//! no Present and no Absent row for the date gets a synthesized Absent row.
//! Re-running for the same date adds nothing.

use crate::ledger::{AttendanceRecord, LedgerError, LedgerStore, Status};
use crate::roster::Roster;
use crate::timetable::{weekday_name, SessionSlot, Timetable};
use chrono::{Datelike, NaiveDate};
use std::collections::HashMap;

/// Which statuses exist for one (id, subject, date) key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marks {
    pub present: bool,
    pub absent: bool,
}

/// Status index over ledger rows, keyed by (id, subject, date).
#[derive(Debug, Default)]
pub struct AttendanceIndex {
    marks: HashMap<(String, String, NaiveDate), Marks>,
}

impl AttendanceIndex {
    pub fn build(rows: &[AttendanceRecord]) -> Self {
        let mut index = Self::default();
        for row in rows {
            index.insert(row);
        }
        index
    }

    pub fn insert(&mut self, row: &AttendanceRecord) {
        let marks = self
            .marks
            .entry((row.id.clone(), row.subject.clone(), row.date))
            .or_default();
        match row.status {
            Status::Present => marks.present = true,
            Status::Absent => marks.absent = true,
        }
    }

    pub fn get(&self, id: &str, subject: &str, date: NaiveDate) -> Marks {
        self.marks
            .get(&(id.to_string(), subject.to_string(), date))
            .copied()
            .unwrap_or_default()
    }
}

/// Summary of one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub date: Option<NaiveDate>,
    /// Absent rows appended by this run.
    pub appended: Vec<AttendanceRecord>,
    /// Pairs skipped because a Present row exists.
    pub already_present: usize,
    /// Pairs skipped because an Absent row exists.
    pub already_absent: usize,
    /// True when no sessions were scheduled for the date.
    pub no_sessions: bool,
}

/// Compute the Absent rows missing for `date`, without writing anything.
///
/// A subject scheduled twice on the same day yields at most one Absent row
/// per student.
pub fn stage_absentees(
    roster: &Roster,
    slots: &[SessionSlot],
    rows: &[AttendanceRecord],
    date: NaiveDate,
) -> ReconcileReport {
    let mut report = ReconcileReport {
        date: Some(date),
        no_sessions: slots.is_empty(),
        ..Default::default()
    };
    if slots.is_empty() {
        return report;
    }

    let mut index = AttendanceIndex::build(rows);

    for student in roster.entries() {
        for slot in slots {
            let marks = index.get(&student.id, &slot.subject, date);
            if marks.present {
                report.already_present += 1;
                continue;
            }
            if marks.absent {
                report.already_absent += 1;
                continue;
            }

            let record =
                AttendanceRecord::absent(&student.id, &student.display_name, date, &slot.subject);
            index.insert(&record);
            report.appended.push(record);
        }
    }

    report
}

/// Reconcile `date` against the ledger in `store`, appending all new Absent
/// rows in one batch.
pub fn reconcile(
    store: &mut dyn LedgerStore,
    roster: &Roster,
    timetable: &Timetable,
    date: NaiveDate,
) -> Result<ReconcileReport, LedgerError> {
    let day = weekday_name(date.weekday());
    let slots = timetable.slots_on(date);
    if slots.is_empty() {
        tracing::info!(day, %date, "no classes scheduled; nothing to reconcile");
        return Ok(ReconcileReport {
            date: Some(date),
            no_sessions: true,
            ..Default::default()
        });
    }

    let rows = store.read_all()?;
    let report = stage_absentees(roster, slots, &rows, date);

    for r in &report.appended {
        tracing::info!(id = %r.id, name = %r.display_name, subject = %r.subject, "marking absent");
    }

    if report.appended.is_empty() {
        tracing::info!(%date, "no new absent records to add");
    } else {
        store.append(&report.appended)?;
        tracing::info!(
            %date,
            added = report.appended.len(),
            ledger = %store.location(),
            "absent records added"
        );
    }

    Ok(report)
}
