use anyhow::{Context, Result};
use chrono::{Local, NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use rollcall_core::{ledger, reconcile, AttendanceContext, Gallery, Roster, Timetable};
use rollcall_hw::Camera;
use rollcall_vision::{train_gallery, ArcFaceEncoder, FacePipeline, ScrfdDetector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing_subscriber::EnvFilter;

mod config;
mod enroll;
mod session;

use config::Config;

#[derive(Parser)]
#[command(name = "rollcall", about = "Classroom attendance by face recognition")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture enrollment images for a student
    Enroll {
        /// Student id; prompted for when omitted
        id: Option<String>,
    },
    /// Encode the enrollment dataset into the face gallery
    Train,
    /// Run the live attendance loop until Ctrl-C
    Run,
    /// Mark unrecorded students absent for today's sessions
    Reconcile {
        /// Date to reconcile (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show today's timetable and the active session
    Status,
}

fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    let outcome = match cli.command {
        Commands::Enroll { id } => run_enroll(config, id).await,
        Commands::Train => run_train(&config),
        Commands::Run => run_live(config).await,
        Commands::Reconcile { date } => run_reconcile(&config, date.unwrap_or_else(|| now().date())),
        Commands::Status => run_status(&config),
    };

    // Outcomes are reported through the log, not the exit status.
    if let Err(e) = outcome {
        tracing::error!("{e:#}");
    }
    Ok(())
}

/// Run `job` on a dedicated thread; Ctrl-C raises the stop flag it polls.
async fn run_until_interrupted<T, F>(name: &str, job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(Arc<AtomicBool>) -> Result<T> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = oneshot::channel::<()>();

    let worker_stop = Arc::clone(&stop);
    let handle = std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = job(worker_stop);
            let _ = done_tx.send(());
            result
        })
        .context("spawning worker thread")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received; stopping");
            stop.store(true, Ordering::Relaxed);
        }
        _ = done_rx => {}
    }

    tokio::task::spawn_blocking(move || handle.join())
        .await?
        .map_err(|_| anyhow::anyhow!("{name} thread panicked"))?
}

async fn run_enroll(config: Config, id: Option<String>) -> Result<()> {
    let id = match id {
        Some(id) => id.trim().to_string(),
        None => {
            let stdin = std::io::stdin();
            enroll::prompt_id(&mut stdin.lock(), &mut std::io::stdout())?
        }
    };
    let dir = enroll::student_dir(&config.dataset_dir, &id)?;

    let mut detector = ScrfdDetector::load(&config.scrfd_model_path())?;
    let mut camera = Camera::open(&config.camera_device)?;
    camera.warm_up(config.warmup_frames);
    tracing::info!(id = %id, "collecting images; look at the camera");

    let count = config.enroll_images;
    let interval = Duration::from_millis(config.enroll_interval_ms);
    let saved = run_until_interrupted("rollcall-enroll", move |stop| {
        enroll::capture_images(&mut camera, &mut detector, &dir, count, interval, &stop)
    })
    .await?;

    tracing::info!(id = %id, saved, "enrollment complete");
    Ok(())
}

fn run_train(config: &Config) -> Result<()> {
    tracing::info!(dataset = %config.dataset_dir.display(), "starting gallery training");
    // Enrollment stored face crops; no detection pass needed.
    let mut encoder = ArcFaceEncoder::load(&config.arcface_model_path())?;
    let report = train_gallery(&config.dataset_dir, &mut encoder)?;
    if report.gallery.is_empty() {
        tracing::warn!("no faces encoded; the gallery will match nobody");
    }
    report.gallery.save(&config.gallery_path)?;
    tracing::info!(
        path = %config.gallery_path.display(),
        faces = report.gallery.len(),
        "face gallery saved"
    );
    Ok(())
}

async fn run_live(config: Config) -> Result<()> {
    let mut ctx = AttendanceContext::load(&config.sources(), config.context_options(), now().date())
        .context("loading attendance data")?;
    let mut encoder = FacePipeline::new(
        ScrfdDetector::load(&config.scrfd_model_path())?,
        ArcFaceEncoder::load(&config.arcface_model_path())?,
    );
    let mut camera = Camera::open(&config.camera_device)?;
    camera.warm_up(config.warmup_frames);

    tracing::info!(ledger = %ctx.ledger().store().location(), "attendance loop running; Ctrl-C to quit");
    let process_every = config.process_every;
    let stats = run_until_interrupted("rollcall-session", move |stop| {
        session::run_session_loop(&mut ctx, &mut camera, &mut encoder, process_every, &stop, &now)
            .map_err(anyhow::Error::from)
    })
    .await?;

    tracing::info!(
        frames = stats.frames,
        faces = stats.faces,
        recorded = stats.recorded,
        write_failures = stats.write_failures,
        "attendance loop stopped"
    );
    Ok(())
}

fn run_reconcile(config: &Config, date: NaiveDate) -> Result<()> {
    tracing::info!(%date, "generating absentee report");
    let roster = Roster::load(&config.roster_path)?;
    let timetable = Timetable::load(&config.timetable_path)?;

    let mut store = ledger::open_store(&config.ledger_path)?;
    store.ensure_exists()?;
    let report = reconcile(store.as_mut(), &roster, &timetable, date)?;

    tracing::info!(
        added = report.appended.len(),
        already_present = report.already_present,
        already_absent = report.already_absent,
        "reconciliation finished"
    );
    Ok(())
}

fn run_status(config: &Config) -> Result<()> {
    let timetable = Timetable::load(&config.timetable_path)?;
    let now = now();
    let slots = timetable.slots_on(now.date());

    println!("Today: {}", now.format("%A %Y-%m-%d %H:%M"));
    if slots.is_empty() {
        println!("  no classes scheduled");
    }
    for slot in slots {
        println!("  {}-{}  {}", slot.start, slot.end, slot.subject);
    }
    println!("{}", timetable.resolve(now).message);

    match Gallery::load(&config.gallery_path) {
        Ok(gallery) => println!(
            "Gallery: {} faces, {} students",
            gallery.len(),
            gallery.label_count()
        ),
        Err(e) => println!("Gallery: {e}"),
    }
    Ok(())
}
