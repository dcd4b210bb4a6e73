//! rollcall-core: Attendance session and ledger engine.
//!
//! Resolves the running class from a weekly timetable, identifies probe
//! embeddings against an enrolled gallery, records presence at most once a
//! day per subject, and backfills Absent rows once the day's sessions are over.

pub mod context;
pub mod gallery;
pub mod ledger;
pub mod reconcile;
pub mod roster;
pub mod timetable;
pub mod types;

pub use context::{AttendanceContext, ContextError, ContextOptions, Observation, PresenceAction, Sources};
pub use gallery::{Gallery, GalleryError};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError, LedgerStore, PresenceOutcome, Status};
pub use reconcile::{reconcile, stage_absentees, ReconcileReport};
pub use roster::{Roster, RosterEntry, RosterError, RosterLookup};
pub use timetable::{SessionSlot, SessionStatus, Timetable, TimetableError};
pub use types::{Embedding, EuclideanMatcher, GalleryEntry, Identity, MatchResult, Matcher};
