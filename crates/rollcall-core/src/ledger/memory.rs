use super::{AttendanceRecord, LedgerError, LedgerStore};

/// Ledger held in memory; nothing survives the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryLedger {
    rows: Vec<AttendanceRecord>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rows(rows: Vec<AttendanceRecord>) -> Self {
        Self { rows }
    }
}

impl LedgerStore for MemoryLedger {
    fn read_all(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.rows.clone())
    }

    fn append(&mut self, records: &[AttendanceRecord]) -> Result<(), LedgerError> {
        self.rows.extend_from_slice(records);
        Ok(())
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
