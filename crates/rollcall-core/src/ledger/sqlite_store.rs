//! SQLite ledger store. Each batch is appended in a single transaction.

use super::{AttendanceRecord, LedgerError, LedgerStore, Status};
use chrono::NaiveDate;
use rusqlite::{params, Connection};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS attendance (
    seq          INTEGER PRIMARY KEY AUTOINCREMENT,
    id           TEXT NOT NULL,
    display_name TEXT NOT NULL,
    date         TEXT NOT NULL,
    time         TEXT NOT NULL,
    day          TEXT NOT NULL,
    subject      TEXT NOT NULL,
    status       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS attendance_key ON attendance (id, subject, date);
";

pub struct SqliteLedger {
    conn: Connection,
    location: String,
}

impl SqliteLedger {
    pub fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn, format!("sqlite:{}", path.display()))
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?, "sqlite::memory:".to_string())
    }

    fn init(conn: Connection, location: String) -> Result<Self, LedgerError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn, location })
    }
}

/// Raw column values as stored.
struct Row {
    id: String,
    display_name: String,
    date: String,
    time: String,
    day: String,
    subject: String,
    status: String,
}

impl TryFrom<Row> for AttendanceRecord {
    type Error = LedgerError;

    fn try_from(row: Row) -> Result<Self, Self::Error> {
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .map_err(|e| LedgerError::Corrupt(format!("date {:?}: {e}", row.date)))?;
        Ok(AttendanceRecord {
            id: row.id,
            display_name: row.display_name,
            date,
            time: row.time,
            day: row.day,
            subject: row.subject,
            status: row.status.parse::<Status>()?,
        })
    }
}

impl LedgerStore for SqliteLedger {
    fn read_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, date, time, day, subject, status FROM attendance ORDER BY seq",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(Row {
                id: r.get(0)?,
                display_name: r.get(1)?,
                date: r.get(2)?,
                time: r.get(3)?,
                day: r.get(4)?,
                subject: r.get(5)?,
                status: r.get(6)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(AttendanceRecord::try_from(row?)?);
        }
        Ok(records)
    }

    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO attendance (id, display_name, date, time, day, subject, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for r in records {
                stmt.execute(params![
                    r.id,
                    r.display_name,
                    r.date.format("%Y-%m-%d").to_string(),
                    r.time,
                    r.day,
                    r.subject,
                    r.status.as_str(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn location(&self) -> String {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn at(time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("2024-01-15 {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_append_preserves_order() {
        let mut ledger = SqliteLedger::open_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        ledger
            .append(&[
                AttendanceRecord::present("001", "Alice", at("09:10:00"), "Math"),
                AttendanceRecord::absent("002", "Bob", date, "Math"),
            ])
            .unwrap();
        ledger
            .append(&[AttendanceRecord::present("003", "Carol", at("09:20:00"), "Math")])
            .unwrap();

        let rows = ledger.read_all().unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["001", "002", "003"]);
        assert_eq!(rows[1].status, Status::Absent);
        assert_eq!(rows[1].time, "N/A");
    }

    #[test]
    fn test_reopen_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attendance.db");
        {
            let mut ledger = SqliteLedger::open(&path).unwrap();
            ledger
                .append(&[AttendanceRecord::present("007", "Bond", at("09:10:00"), "Math")])
                .unwrap();
        }
        let ledger = SqliteLedger::open(&path).unwrap();
        let rows = ledger.read_all().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "007");
    }

    #[test]
    fn test_corrupt_status_rejected() {
        let ledger = SqliteLedger::open_in_memory().unwrap();
        ledger
            .conn
            .execute(
                "INSERT INTO attendance (id, display_name, date, time, day, subject, status)
                 VALUES ('001', 'Alice', '2024-01-15', 'N/A', 'Monday', 'Math', 'Late')",
                [],
            )
            .unwrap();
        assert!(matches!(ledger.read_all(), Err(LedgerError::Corrupt(_))));
    }
}
