//! A full day against files on disk: load, mark presence, restart the live
//! loop, then reconcile absentees twice.

use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::ledger::CsvLedger;
use rollcall_core::{
    reconcile, AttendanceContext, ContextOptions, Embedding, Gallery, LedgerStore,
    PresenceAction, Roster, Status, Sources, Timetable,
};
use std::path::Path;

const TIMETABLE: &str = r#"{
    "Monday": [
        {"start": "09:00", "end": "10:00", "subject": "Math"},
        {"start": "10:15", "end": "bogus", "subject": "Broken"},
        {"start": "11:00", "end": "12:00", "subject": "Physics"}
    ]
}"#;

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
}

fn at(time: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(&format!("2024-01-15 {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
}

fn write_sources(dir: &Path) -> Sources {
    std::fs::write(dir.join("students.csv"), "RollNo,Name\n001,Alice\n002,Bob\n").unwrap();
    std::fs::write(dir.join("timetable.json"), TIMETABLE).unwrap();

    let mut gallery = Gallery::new();
    gallery.push("001", Embedding::new(vec![1.0, 0.0, 0.0]));
    gallery.push("001", Embedding::new(vec![0.9, 0.1, 0.0]));
    gallery.push("002", Embedding::new(vec![0.0, 1.0, 0.0]));
    gallery.save(&dir.join("face_gallery.json")).unwrap();

    Sources {
        roster: dir.join("students.csv"),
        timetable: dir.join("timetable.json"),
        gallery: dir.join("face_gallery.json"),
        ledger: dir.join("attendance.csv"),
    }
}

fn sighting(ctx: &mut AttendanceContext, probe: [f32; 3], time: &str) -> PresenceAction {
    let now = at(time);
    let session = ctx.session_at(now);
    ctx.observe(&Embedding::new(probe.to_vec()), session.subject.as_deref(), now)
        .action
}

#[test]
fn test_full_day() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path());

    let mut ctx = AttendanceContext::load(&sources, ContextOptions::default(), monday()).unwrap();
    assert_eq!(ctx.session_at(at("09:30:00")).subject.as_deref(), Some("Math"));
    assert_eq!(ctx.session_at(at("10:30:00")).subject, None);

    assert!(matches!(sighting(&mut ctx, [0.95, 0.05, 0.0], "09:05:00"), PresenceAction::Recorded(_)));
    assert!(matches!(sighting(&mut ctx, [1.0, 0.0, 0.0], "09:40:00"), PresenceAction::AlreadyMarked));
    assert!(matches!(sighting(&mut ctx, [0.0, 0.0, 1.0], "09:41:00"), PresenceAction::NotRecognized));
    drop(ctx);

    // Restart mid-session: the seeded dedup set prevents a second Present row.
    let mut ctx = AttendanceContext::load(&sources, ContextOptions::default(), monday()).unwrap();
    assert!(ctx.ledger().is_marked("001", "Math", monday()));
    assert!(matches!(sighting(&mut ctx, [1.0, 0.0, 0.0], "09:50:00"), PresenceAction::AlreadyMarked));
    assert!(matches!(sighting(&mut ctx, [0.0, 1.0, 0.0], "11:30:00"), PresenceAction::Recorded(_)));
    drop(ctx);

    let roster = Roster::load(&sources.roster).unwrap();
    let timetable = Timetable::load(&sources.timetable).unwrap();
    let mut store = CsvLedger::new(&sources.ledger);

    let first = reconcile(&mut store, &roster, &timetable, monday()).unwrap();
    let mut absent: Vec<(String, String)> = first
        .appended
        .iter()
        .map(|r| (r.id.clone(), r.subject.clone()))
        .collect();
    absent.sort();
    // The malformed slot still names a scheduled subject.
    assert_eq!(
        absent,
        vec![
            ("001".to_string(), "Broken".to_string()),
            ("001".to_string(), "Physics".to_string()),
            ("002".to_string(), "Broken".to_string()),
            ("002".to_string(), "Math".to_string()),
        ]
    );

    let second = reconcile(&mut store, &roster, &timetable, monday()).unwrap();
    assert!(second.appended.is_empty());

    let rows = store.read_all().unwrap();
    assert_eq!(rows.len(), 6);
    assert_eq!(rows.iter().filter(|r| r.status == Status::Present).count(), 2);

    let text = std::fs::read_to_string(&sources.ledger).unwrap();
    assert_eq!(text.lines().filter(|l| l.starts_with("id,")).count(), 1);
}

#[test]
fn test_legacy_mode_allows_duplicate_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let sources = write_sources(dir.path());
    let legacy = ContextOptions {
        seed_dedup: false,
        ..ContextOptions::default()
    };

    for time in ["09:05:00", "09:35:00"] {
        let mut ctx = AttendanceContext::load(&sources, legacy, monday()).unwrap();
        assert!(matches!(sighting(&mut ctx, [1.0, 0.0, 0.0], time), PresenceAction::Recorded(_)));
    }

    let rows = CsvLedger::new(&sources.ledger).read_all().unwrap();
    assert_eq!(rows.len(), 2);
}
