use rollcall_core::{ContextOptions, Sources};
use rollcall_vision::arcface_tolerance;
use std::path::PathBuf;

/// Runtime configuration, loaded from environment variables.
pub struct Config {
    /// Base directory for every data file not overridden individually.
    pub data_dir: PathBuf,
    /// Student roster CSV.
    pub roster_path: PathBuf,
    /// Weekly timetable JSON.
    pub timetable_path: PathBuf,
    /// Trained gallery JSON.
    pub gallery_path: PathBuf,
    /// Attendance ledger; `.db`/`.sqlite` selects the SQLite store.
    pub ledger_path: PathBuf,
    /// Enrollment images, one subdirectory per student id.
    pub dataset_dir: PathBuf,
    /// Directory containing the SCRFD and ArcFace ONNX models.
    pub model_dir: PathBuf,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Maximum Euclidean distance for a positive match. Defaults to the
    /// ArcFace distance for cosine similarity 0.40 (about 1.095).
    pub tolerance: f32,
    /// Images captured per enrollment.
    pub enroll_images: usize,
    /// Pause between enrollment captures.
    pub enroll_interval_ms: u64,
    /// Frames discarded after opening the camera.
    pub warmup_frames: usize,
    /// Run recognition on every Nth frame.
    pub process_every: usize,
    /// Record presence for gallery labels missing from the roster.
    pub record_unresolved: bool,
    /// Seed the dedup set from today's ledger rows at startup.
    pub seed_dedup: bool,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        let path_or = |key: &str, default: &str| {
            std::env::var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|_| data_dir.join(default))
        };

        Self {
            roster_path: path_or("ROLLCALL_ROSTER", "students.csv"),
            timetable_path: path_or("ROLLCALL_TIMETABLE", "timetable.json"),
            gallery_path: path_or("ROLLCALL_GALLERY", "face_gallery.json"),
            ledger_path: path_or("ROLLCALL_LEDGER", "attendance.csv"),
            dataset_dir: path_or("ROLLCALL_DATASET_DIR", "dataset"),
            model_dir: path_or("ROLLCALL_MODEL_DIR", "models"),
            camera_device: std::env::var("ROLLCALL_CAMERA_DEVICE")
                .unwrap_or_else(|_| "/dev/video0".to_string()),
            tolerance: env_parse("ROLLCALL_TOLERANCE", arcface_tolerance()),
            enroll_images: env_parse("ROLLCALL_ENROLL_IMAGES", 30),
            enroll_interval_ms: env_parse("ROLLCALL_ENROLL_INTERVAL_MS", 200),
            warmup_frames: env_parse("ROLLCALL_WARMUP_FRAMES", 4),
            process_every: env_parse::<usize>("ROLLCALL_PROCESS_EVERY", 2).max(1),
            record_unresolved: env_flag("ROLLCALL_RECORD_UNRESOLVED", false),
            seed_dedup: env_flag("ROLLCALL_SEED_DEDUP", true),
            data_dir,
        }
    }

    /// Path to the SCRFD face detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> PathBuf {
        self.model_dir.join("w600k_r50.onnx")
    }

    pub fn sources(&self) -> Sources {
        Sources {
            roster: self.roster_path.clone(),
            timetable: self.timetable_path.clone(),
            gallery: self.gallery_path.clone(),
            ledger: self.ledger_path.clone(),
        }
    }

    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            tolerance: self.tolerance,
            seed_dedup: self.seed_dedup,
            record_unresolved: self.record_unresolved,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| v != "0").unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fit_arcface() {
        if std::env::var_os("ROLLCALL_TOLERANCE").is_some() {
            return;
        }
        let config = Config::from_env();
        assert!((config.tolerance - 1.095).abs() < 1e-3);
        assert!(config.context_options().tolerance > ContextOptions::default().tolerance);
        assert!(config.scrfd_model_path().ends_with("det_10g.onnx"));
        assert!(config.arcface_model_path().ends_with("w600k_r50.onnx"));
    }

    #[test]
    fn test_env_flag_parsing() {
        assert!(env_flag("ROLLCALL_TEST_UNSET_FLAG", true));
        assert!(!env_flag("ROLLCALL_TEST_UNSET_FLAG", false));
        assert_eq!(env_parse("ROLLCALL_TEST_UNSET_NUMBER", 7usize), 7);
    }
}
