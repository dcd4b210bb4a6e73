//! Enrollment capture: save face images for one student.

use anyhow::{bail, Context, Result};
use rollcall_hw::FrameSource;
use rollcall_vision::{crop_face, FaceLocator};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Ask for a student id on the terminal.
pub fn prompt_id(input: &mut dyn BufRead, output: &mut dyn Write) -> Result<String> {
    write!(output, "Enter student id: ")?;
    output.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Reject ids that would escape the dataset directory.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        bail!("student id cannot be empty");
    }
    if id == "." || id == ".." || id.contains(['/', '\\']) {
        bail!("student id {id:?} is not a valid directory name");
    }
    Ok(())
}

/// Create `<dataset>/<id>`, warning when it already holds images.
pub fn student_dir(dataset: &Path, id: &str) -> Result<PathBuf> {
    validate_id(id)?;
    let dir = dataset.join(id);
    if dir.exists() {
        tracing::warn!(path = %dir.display(), "directory already exists; images may be overwritten");
    } else {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating {}", dir.display()))?;
        tracing::info!(path = %dir.display(), "directory created");
    }
    Ok(dir)
}

/// Save up to `count` face crops into `dir` as `1.png`, `2.png`, ...
///
/// Each non-dark frame contributes the crop of its most confident face; frames
/// without a face are skipped. Gives up after `count * 3` captures. Returns the
/// number saved.
pub fn capture_images(
    source: &mut dyn FrameSource,
    locator: &mut dyn FaceLocator,
    dir: &Path,
    count: usize,
    interval: Duration,
    stop: &AtomicBool,
) -> Result<usize> {
    let max_attempts = count * 3;
    let mut saved = 0usize;

    for _ in 0..max_attempts {
        if saved >= count {
            break;
        }
        if stop.load(Ordering::Relaxed) {
            tracing::info!("enrollment stopped early");
            break;
        }

        let frame = source.next_frame().context("capturing frame")?;
        if frame.is_dark {
            tracing::debug!(seq = frame.sequence, "skipping dark frame");
            continue;
        }

        let image = frame.to_image().context("converting frame")?;
        let faces = locator.locate(&image).context("locating faces")?;
        let Some(crop) = faces.first().and_then(|face| crop_face(&image, face)) else {
            tracing::debug!(seq = frame.sequence, "no face in frame");
            continue;
        };

        let path = dir.join(format!("{}.png", saved + 1));
        crop.save(&path)
            .with_context(|| format!("saving {}", path.display()))?;
        saved += 1;
        tracing::info!("collected {saved}/{count}");

        if !interval.is_zero() {
            std::thread::sleep(interval);
        }
    }

    Ok(saved)
}
