//! Live session loop: frames in, presence rows out.

use chrono::NaiveDateTime;
use rollcall_core::{AttendanceContext, PresenceAction};
use rollcall_hw::{CameraError, FrameSource};
use rollcall_vision::FaceEncoder;
use std::sync::atomic::{AtomicBool, Ordering};

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: usize,
    pub processed: usize,
    pub faces: usize,
    pub unknown: usize,
    pub recorded: usize,
    pub write_failures: usize,
}

/// Poll `source` until `stop` is set or capture fails.
///
/// Every iteration re-resolves the active session; recognition runs on every
/// `process_every`th frame. Per-probe failures are logged and never end the
/// loop.
pub fn run_session_loop(
    ctx: &mut AttendanceContext,
    source: &mut dyn FrameSource,
    encoder: &mut dyn FaceEncoder,
    process_every: usize,
    stop: &AtomicBool,
    clock: &dyn Fn() -> NaiveDateTime,
) -> Result<LoopStats, CameraError> {
    let process_every = process_every.max(1);
    let mut stats = LoopStats::default();
    let mut last_status: Option<String> = None;

    while !stop.load(Ordering::Relaxed) {
        let now = clock();
        let session = ctx.session_at(now);
        if last_status.as_deref() != Some(session.message.as_str()) {
            tracing::info!(subject = ?session.subject, "{}", session.message);
            last_status = Some(session.message.clone());
        }

        let frame = source.next_frame()?;
        stats.frames += 1;
        if (stats.frames - 1) % process_every != 0 {
            continue;
        }
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }
        stats.processed += 1;

        let image = match frame.to_image() {
            Ok(image) => image,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "unusable frame");
                continue;
            }
        };
        let probes = match encoder.encode(&image) {
            Ok(probes) => probes,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "face encoding failed");
                continue;
            }
        };

        for probe in &probes {
            stats.faces += 1;
            let obs = ctx.observe(probe, session.subject.as_deref(), now);
            match obs.action {
                PresenceAction::NotRecognized => {
                    stats.unknown += 1;
                    tracing::debug!(distance = ?obs.distance, "unknown face");
                }
                PresenceAction::NoSession => {
                    tracing::debug!(who = %obs.caption, "recognized outside class time");
                }
                PresenceAction::Recorded(_) => stats.recorded += 1,
                PresenceAction::AlreadyMarked => {
                    tracing::trace!(who = %obs.caption, "already marked");
                }
                PresenceAction::SkippedUnresolved => {
                    tracing::debug!(who = %obs.caption, "label not on roster");
                }
                PresenceAction::WriteFailed(e) => {
                    stats.write_failures += 1;
                    tracing::error!(who = %obs.caption, error = %e, "failed to write attendance");
                }
            }
        }
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use rollcall_core::ledger::MemoryLedger;
    use rollcall_core::{
        AttendanceLedger, ContextOptions, Embedding, Gallery, Roster, RosterEntry, SessionSlot,
        Status, Timetable,
    };
    use rollcall_hw::Frame;
    use rollcall_vision::EncoderError;
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays frames, raising `stop` as the last one is handed out.
    struct Replay {
        frames: VecDeque<Frame>,
        stop: Arc<AtomicBool>,
    }

    impl FrameSource for Replay {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            let frame = self
                .frames
                .pop_front()
                .ok_or_else(|| CameraError::CaptureFailed("replay exhausted".into()))?;
            if self.frames.is_empty() {
                self.stop.store(true, Ordering::Relaxed);
            }
            Ok(frame)
        }
    }

    /// One probe per frame: the frame's brightness on the first axis.
    struct BrightnessEncoder;

    impl FaceEncoder for BrightnessEncoder {
        fn encode(&mut self, image: &GrayImage) -> Result<Vec<Embedding>, EncoderError> {
            let v = image.as_raw()[0] as f32 / 255.0;
            Ok(vec![Embedding::new(vec![v])])
        }
    }

    fn frame(value: u8, seq: u32) -> Frame {
        Frame::from_gray(vec![value; 4], 2, 2, seq).unwrap()
    }

    fn context() -> AttendanceContext {
        let roster =
            Roster::new(vec![RosterEntry::new("001", "Alice"), RosterEntry::new("002", "Bob")]).unwrap();
        let timetable =
            Timetable::new().with_day("Monday", vec![SessionSlot::new("09:00", "10:00", "Math")]);
        let mut gallery = Gallery::new();
        gallery.push("001", Embedding::new(vec![1.0]));
        gallery.push("002", Embedding::new(vec![0.5]));
        let options = ContextOptions {
            tolerance: 0.05,
            ..ContextOptions::default()
        };
        AttendanceContext::from_parts(
            roster,
            timetable,
            gallery,
            AttendanceLedger::new(Box::new(MemoryLedger::new())),
            options,
        )
    }

    fn monday(time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("2024-01-15 {time}"), "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_loop_records_each_student_once() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = Replay {
            frames: [255, 255, 255, 128, 64].iter().enumerate().map(|(i, &v)| frame(v, i as u32)).collect(),
            stop: Arc::clone(&stop),
        };
        let mut ctx = context();

        let stats = run_session_loop(
            &mut ctx,
            &mut source,
            &mut BrightnessEncoder,
            1,
            &stop,
            &|| monday("09:30:00"),
        )
        .unwrap();

        assert_eq!(stats.frames, 5);
        assert_eq!(stats.processed, 5);
        assert_eq!(stats.recorded, 2);
        assert_eq!(stats.unknown, 1);

        let rows = ctx.ledger().store().read_all().unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["001", "002"]);
        assert!(rows.iter().all(|r| r.status == Status::Present));
    }

    #[test]
    fn test_loop_skips_frames_and_dark_frames() {
        let stop = Arc::new(AtomicBool::new(false));
        // Frames 0 and 2 are processed; frame 2 is dark.
        let mut source = Replay {
            frames: [255, 128, 0, 128].iter().enumerate().map(|(i, &v)| frame(v, i as u32)).collect(),
            stop: Arc::clone(&stop),
        };
        let mut ctx = context();

        let stats = run_session_loop(
            &mut ctx,
            &mut source,
            &mut BrightnessEncoder,
            2,
            &stop,
            &|| monday("09:30:00"),
        )
        .unwrap();

        assert_eq!(stats.frames, 4);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.recorded, 1);
    }

    #[test]
    fn test_loop_outside_class_records_nothing() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = Replay {
            frames: [255, 128].iter().enumerate().map(|(i, &v)| frame(v, i as u32)).collect(),
            stop: Arc::clone(&stop),
        };
        let mut ctx = context();

        let stats = run_session_loop(
            &mut ctx,
            &mut source,
            &mut BrightnessEncoder,
            1,
            &stop,
            &|| monday("12:00:00"),
        )
        .unwrap();

        assert_eq!(stats.faces, 2);
        assert_eq!(stats.recorded, 0);
        assert!(ctx.ledger().store().read_all().unwrap().is_empty());
    }

    #[test]
    fn test_session_change_mid_loop() {
        let stop = Arc::new(AtomicBool::new(false));
        let mut source = Replay {
            frames: [255, 255].iter().enumerate().map(|(i, &v)| frame(v, i as u32)).collect(),
            stop: Arc::clone(&stop),
        };
        let mut ctx = context();
        let tick = Cell::new(0);
        let clock = || {
            tick.set(tick.get() + 1);
            if tick.get() == 1 {
                monday("08:59:59")
            } else {
                monday("09:00:00")
            }
        };

        let stats =
            run_session_loop(&mut ctx, &mut source, &mut BrightnessEncoder, 1, &stop, &clock).unwrap();
        assert_eq!(stats.recorded, 1);
        let rows = ctx.ledger().store().read_all().unwrap();
        assert_eq!(rows[0].time, "09:00:00");
    }

    #[test]
    fn test_capture_failure_ends_loop() {
        let stop = AtomicBool::new(false);
        let mut source = Replay {
            frames: VecDeque::new(),
            stop: Arc::new(AtomicBool::new(false)),
        };
        let mut ctx = context();
        let result = run_session_loop(
            &mut ctx,
            &mut source,
            &mut BrightnessEncoder,
            1,
            &stop,
            &|| monday("09:30:00"),
        );
        assert!(matches!(result, Err(CameraError::CaptureFailed(_))));
    }
}
