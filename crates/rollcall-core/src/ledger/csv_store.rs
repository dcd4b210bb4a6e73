//! CSV-file ledger store.
//!
//! Appends open the file with `O_APPEND`, so each batch lands after whatever
//! is on disk at write time instead of at a previously read row offset. The
//! header is written only when the file is created or empty.

use super::{AttendanceRecord, LedgerError, LedgerStore, COLUMNS};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct CsvLedger {
    path: PathBuf,
}

impl CsvLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open for appending. Returns the file and whether it needs a header.
    fn open_for_append(&self) -> Result<(File, bool), LedgerError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            return Ok((file, true));
        }

        // A hand-edited file may lack the final newline; don't glue rows together.
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            file.write_all(b"\n")?;
        }
        Ok((file, false))
    }
}

impl LedgerStore for CsvLedger {
    fn read_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;
        let rows = reader
            .deserialize::<AttendanceRecord>()
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        if records.is_empty() {
            return Ok(());
        }

        let (file, needs_header) = self.open_for_append()?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(needs_header)
            .from_writer(file);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;

        tracing::debug!(path = %self.path.display(), rows = records.len(), "appended ledger rows");
        Ok(())
    }

    fn ensure_exists(&mut self) -> Result<(), LedgerError> {
        let (file, needs_header) = self.open_for_append()?;
        if needs_header {
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(COLUMNS)?;
            writer.flush()?;
            tracing::info!(path = %self.path.display(), "created empty attendance ledger");
        }
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}
