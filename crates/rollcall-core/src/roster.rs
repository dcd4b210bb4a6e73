//! Student roster loaded from CSV.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Display text used when a label has no roster entry.
pub const NAME_NOT_FOUND: &str = "(Name not found)";

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("roster file not found: {0}")]
    NotFound(String),
    #[error("duplicate roster id {0:?}")]
    DuplicateId(String),
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterEntry {
    #[serde(alias = "RollNo")]
    pub id: String,
    #[serde(alias = "Name")]
    pub display_name: String,
}

impl RosterEntry {
    pub fn new(id: &str, display_name: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// Result of resolving an id against the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterLookup<'a> {
    Found(&'a str),
    Missing,
}

impl<'a> RosterLookup<'a> {
    pub fn name(&self) -> Option<&'a str> {
        match *self {
            RosterLookup::Found(name) => Some(name),
            RosterLookup::Missing => None,
        }
    }

    /// Name to show, falling back to the placeholder.
    pub fn display(&self) -> &'a str {
        self.name().unwrap_or(NAME_NOT_FOUND)
    }
}

/// Enrolled students in file order, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct Roster {
    entries: Vec<RosterEntry>,
    by_id: HashMap<String, usize>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Result<Self, RosterError> {
        let mut by_id = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if by_id.insert(entry.id.clone(), i).is_some() {
                return Err(RosterError::DuplicateId(entry.id.clone()));
            }
        }
        Ok(Self { entries, by_id })
    }

    /// Load a roster CSV. Ids are kept as text so "007" stays "007".
    pub fn load(path: &Path) -> Result<Self, RosterError> {
        if !path.exists() {
            return Err(RosterError::NotFound(path.display().to_string()));
        }
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        Self::from_reader(reader)
    }

    fn from_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, RosterError> {
        let entries = reader
            .deserialize::<RosterEntry>()
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    pub fn lookup(&self, id: &str) -> RosterLookup<'_> {
        match self.by_id.get(id) {
            Some(&i) => RosterLookup::Found(&self.entries[i].display_name),
            None => RosterLookup::Missing,
        }
    }

    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
