//! Weekly timetable and the session resolver.
//!
//! Slot times stay as the strings found in the file and are parsed on every
//! resolution, so one malformed slot costs a warning instead of the whole
//! timetable.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

const TIME_FORMATS: [&str; 2] = ["%H:%M", "%H:%M:%S"];

#[derive(Error, Debug)]
pub enum TimetableError {
    #[error("timetable file not found: {0}")]
    NotFound(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// A slot's time field failed to parse.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid time {value:?} in slot {subject:?}")]
pub struct MalformedSlot {
    pub subject: String,
    pub value: String,
}

/// One scheduled class within a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSlot {
    pub start: String,
    pub end: String,
    pub subject: String,
}

impl SessionSlot {
    pub fn new(start: &str, end: &str, subject: &str) -> Self {
        Self {
            start: start.to_string(),
            end: end.to_string(),
            subject: subject.to_string(),
        }
    }

    /// Parsed `[start, end]` bounds.
    pub fn window(&self) -> Result<(NaiveTime, NaiveTime), MalformedSlot> {
        Ok((self.parse(&self.start)?, self.parse(&self.end)?))
    }

    /// Whether `time` lies inside the slot, inclusive of both bounds.
    pub fn contains(&self, time: NaiveTime) -> Result<bool, MalformedSlot> {
        let (start, end) = self.window()?;
        Ok(start <= time && time <= end)
    }

    fn parse(&self, value: &str) -> Result<NaiveTime, MalformedSlot> {
        let value = value.trim();
        TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveTime::parse_from_str(value, fmt).ok())
            .ok_or_else(|| MalformedSlot {
                subject: self.subject.clone(),
                value: value.to_string(),
            })
    }
}

/// Result of asking the timetable what is running now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub subject: Option<String>,
    pub message: String,
}

impl SessionStatus {
    pub fn is_active(&self) -> bool {
        self.subject.is_some()
    }
}

/// Full English weekday name, the timetable's day key.
pub fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Mapping from weekday name to that day's slots in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timetable {
    days: HashMap<String, Vec<SessionSlot>>,
}

impl Timetable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(mut self, day: &str, slots: Vec<SessionSlot>) -> Self {
        self.days.insert(day.to_string(), slots);
        self
    }

    pub fn load(path: &Path) -> Result<Self, TimetableError> {
        if !path.exists() {
            return Err(TimetableError::NotFound(path.display().to_string()));
        }
        Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
    }

    pub fn from_json(json: &str) -> Result<Self, TimetableError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Slots declared for `day`, `None` when the day has no key.
    pub fn slots_for(&self, day: &str) -> Option<&[SessionSlot]> {
        self.days.get(day).map(Vec::as_slice)
    }

    /// Slots declared for the weekday of `date`; empty when none.
    pub fn slots_on(&self, date: NaiveDate) -> &[SessionSlot] {
        self.slots_for(weekday_name(date.weekday())).unwrap_or(&[])
    }

    /// Determine the active subject at `now`.
    ///
    /// The first slot in declaration order whose window contains `now` wins,
    /// even when a later overlapping slot is tighter.
    pub fn resolve(&self, now: NaiveDateTime) -> SessionStatus {
        let day = weekday_name(now.weekday());
        let Some(slots) = self.slots_for(day) else {
            return SessionStatus {
                subject: None,
                message: "No classes scheduled for today.".to_string(),
            };
        };

        let time = now.time();
        for slot in slots {
            match slot.contains(time) {
                Ok(true) => {
                    return SessionStatus {
                        subject: Some(slot.subject.clone()),
                        message: format!("Class: {} (Attendance ON)", slot.subject),
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(day, start = %slot.start, end = %slot.end, error = %e, "skipping malformed timetable slot");
                }
            }
        }

        SessionStatus {
            subject: None,
            message: "No Class Scheduled (Attendance OFF)".to_string(),
        }
    }
}
