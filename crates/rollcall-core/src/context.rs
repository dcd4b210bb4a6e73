//! Process-lifetime attendance state.
//!
//! Roster, timetable and gallery are loaded once and held read-only; the
//! ledger's dedup set is the only state that changes while the loop runs.

use crate::gallery::{Gallery, GalleryError};
use crate::ledger::{open_store, AttendanceLedger, AttendanceRecord, LedgerError, PresenceOutcome};
use crate::roster::{Roster, RosterError, RosterLookup};
use crate::timetable::{SessionStatus, Timetable, TimetableError};
use crate::types::{Embedding, EuclideanMatcher, Identity};
use chrono::{NaiveDate, NaiveDateTime};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContextError {
    #[error("{kind} not found: {path}")]
    MissingSource { kind: &'static str, path: String },
    #[error("roster: {0}")]
    Roster(RosterError),
    #[error("timetable: {0}")]
    Timetable(TimetableError),
    #[error("gallery: {0}")]
    Gallery(GalleryError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl From<RosterError> for ContextError {
    fn from(e: RosterError) -> Self {
        match e {
            RosterError::NotFound(path) => ContextError::MissingSource { kind: "roster", path },
            other => ContextError::Roster(other),
        }
    }
}

impl From<TimetableError> for ContextError {
    fn from(e: TimetableError) -> Self {
        match e {
            TimetableError::NotFound(path) => ContextError::MissingSource { kind: "timetable", path },
            other => ContextError::Timetable(other),
        }
    }
}

impl From<GalleryError> for ContextError {
    fn from(e: GalleryError) -> Self {
        match e {
            GalleryError::NotFound(path) => ContextError::MissingSource { kind: "gallery", path },
            other => ContextError::Gallery(other),
        }
    }
}

/// Where the context loads from.
#[derive(Debug, Clone)]
pub struct Sources {
    pub roster: PathBuf,
    pub timetable: PathBuf,
    pub gallery: PathBuf,
    pub ledger: PathBuf,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    /// Maximum accepted distance to the nearest gallery entry.
    pub tolerance: f32,
    /// Seed the dedup set from today's Present rows at load.
    pub seed_dedup: bool,
    /// Record presence under the placeholder name when a label is not on the roster.
    pub record_unresolved: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.5,
            seed_dedup: true,
            record_unresolved: false,
        }
    }
}

/// What happened to one probe.
#[derive(Debug)]
pub enum PresenceAction {
    /// The probe matched nobody.
    NotRecognized,
    /// Recognized, but no class is running.
    NoSession,
    Recorded(AttendanceRecord),
    AlreadyMarked,
    /// Recognized label has no roster entry; nothing written.
    SkippedUnresolved,
    /// The ledger append failed; the key stays unmarked.
    WriteFailed(LedgerError),
}

#[derive(Debug)]
pub struct Observation {
    pub identity: Identity,
    /// "id - name" for recognized probes, "Unknown" otherwise.
    pub caption: String,
    pub distance: Option<f32>,
    pub action: PresenceAction,
}

pub struct AttendanceContext {
    roster: Roster,
    timetable: Timetable,
    gallery: Gallery,
    ledger: AttendanceLedger,
    matcher: EuclideanMatcher,
    options: ContextOptions,
}

impl AttendanceContext {
    /// Load every source, failing before any state exists if one is missing.
    pub fn load(
        sources: &Sources,
        options: ContextOptions,
        today: NaiveDate,
    ) -> Result<Self, ContextError> {
        tracing::info!(path = %sources.roster.display(), "loading roster");
        let roster = Roster::load(&sources.roster)?;
        tracing::info!(path = %sources.timetable.display(), "loading timetable");
        let timetable = Timetable::load(&sources.timetable)?;
        tracing::info!(path = %sources.gallery.display(), "loading gallery");
        let gallery = Gallery::load(&sources.gallery)?;

        tracing::info!(
            students = roster.len(),
            gallery_entries = gallery.len(),
            gallery_labels = gallery.label_count(),
            "sources loaded"
        );

        let store = open_store(&sources.ledger)?;
        let mut ctx = Self::from_parts(roster, timetable, gallery, AttendanceLedger::new(store), options);
        if options.seed_dedup {
            let seeded = ctx.ledger.seed_from_store(today)?;
            tracing::info!(seeded, %today, "dedup set seeded from ledger");
        }
        Ok(ctx)
    }

    pub fn from_parts(
        roster: Roster,
        timetable: Timetable,
        gallery: Gallery,
        ledger: AttendanceLedger,
        options: ContextOptions,
    ) -> Self {
        Self {
            roster,
            timetable,
            gallery,
            ledger,
            matcher: EuclideanMatcher,
            options,
        }
    }

    pub fn session_at(&self, now: NaiveDateTime) -> SessionStatus {
        self.timetable.resolve(now)
    }

    /// Match one probe and, when a class is running, record presence.
    pub fn observe(
        &mut self,
        probe: &Embedding,
        subject: Option<&str>,
        now: NaiveDateTime,
    ) -> Observation {
        let result = self
            .gallery
            .identify(&self.matcher, probe, self.options.tolerance);

        let Identity::Known(id) = &result.identity else {
            return Observation {
                identity: Identity::Unknown,
                caption: Identity::Unknown.to_string(),
                distance: result.distance,
                action: PresenceAction::NotRecognized,
            };
        };

        let lookup = self.roster.lookup(id);
        let caption = format!("{id} - {}", lookup.display());

        let action = match (subject, lookup) {
            (None, _) => PresenceAction::NoSession,
            (Some(_), RosterLookup::Missing) if !self.options.record_unresolved => {
                tracing::warn!(id = %id, "recognized label is not on the roster; not recording");
                PresenceAction::SkippedUnresolved
            }
            (Some(subject), lookup) => {
                match self.ledger.record_presence(id, lookup.display(), now, subject) {
                    Ok(PresenceOutcome::Recorded(record)) => PresenceAction::Recorded(record),
                    Ok(PresenceOutcome::AlreadyMarked) => PresenceAction::AlreadyMarked,
                    Err(e) => PresenceAction::WriteFailed(e),
                }
            }
        };

        Observation {
            identity: result.identity.clone(),
            caption,
            distance: result.distance,
            action,
        }
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn timetable(&self) -> &Timetable {
        &self.timetable
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.ledger
    }
}
