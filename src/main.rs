use rollcall::{
    attendance::{
        BatchIdentifier, CancelToken, Capabilities, Enroller, FaceResolution, LiveAttendance, SessionState, SystemClock,
    },
    camera::{FrameSource, ImageSequenceSource, list_images},
    cli::{TerminalPreview, check_for_escape},
    common::{Config, DataPaths},
    core::{LivenessClassifier, LivenessStatus, RecognitionEngine},
    storage::{AttendanceSink, EmbeddingStore, IdentityKey, InsertOutcome, JsonRoster, JsonlAttendanceLedger},
};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use image::DynamicImage;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Face-recognition attendance")]
struct Cli {
    /// Enable development mode (keeps all data under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to the data directory's rollcall.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll one identity from a folder of photos or the camera
    Enroll {
        #[arg(short, long)]
        identity: String,
        /// Folder of jpg/png photos
        #[arg(long, conflicts_with = "camera")]
        images: Option<PathBuf>,
        /// Capture from the configured camera
        #[arg(long)]
        camera: bool,
    },
    /// Enroll every roster member with a sub-folder under DIR
    EnrollBulk { dir: PathBuf },
    /// Run one live attendance session
    Attend {
        /// Replay a folder of frames instead of the camera
        #[arg(long)]
        frames: Option<PathBuf>,
        /// Show an ASCII preview (ESC cancels)
        #[arg(long)]
        preview: bool,
    },
    /// Mark attendance for everyone recognised in a group photo
    Batch { image: PathBuf },
    /// Train the liveness classifier from labelled face crops
    TrainLiveness {
        #[arg(long)]
        real: PathBuf,
        #[arg(long)]
        fake: PathBuf,
    },
    /// Show capabilities and enrollment status
    Status,
    /// List today's attendance
    Today,
    /// Export all embeddings to a JSON snapshot
    Export { file: PathBuf },
    /// Replace all embeddings with a JSON snapshot
    Import { file: PathBuf },
    /// Remove one identity's embeddings
    Purge {
        #[arg(short, long)]
        identity: String,
    },
    /// Remove every stored embedding
    Reset,
}

struct App {
    config: Config,
    paths: DataPaths,
    capabilities: Capabilities,
    store: EmbeddingStore,
    liveness: LivenessClassifier,
}

impl App {
    fn open(dev: bool, config_path: Option<&Path>) -> Result<Self> {
        let paths = DataPaths::new(dev)?;
        let config = match config_path {
            Some(path) => Config::load_from_path(path)?,
            None => Config::load_or_default(paths.config_file())?,
        };

        let capabilities = Capabilities::resolve(&config, &paths);
        let store = EmbeddingStore::open(paths.embeddings_file());
        let liveness = LivenessClassifier::load(paths.liveness_model_file(), &config.liveness);

        Ok(Self {
            config,
            paths,
            capabilities,
            store,
            liveness,
        })
    }

    fn ledger(&self) -> Result<JsonlAttendanceLedger> {
        Ok(JsonlAttendanceLedger::open(self.paths.attendance_file())?)
    }

    fn roster(&self) -> Result<JsonRoster> {
        Ok(JsonRoster::load(&self.paths.roster_file())?)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on mode
    setup_logging(cli.dev);

    let app = App::open(cli.dev, cli.config.as_deref())?;

    match cli.command {
        Commands::Enroll { identity, images, camera } => {
            let identity = IdentityKey::new(identity);
            let enroller = Enroller::new(&app.capabilities, &app.store, &app.config);

            let mut source = match (images, camera) {
                (Some(dir), _) => Box::new(ImageSequenceSource::from_dir(&dir)?) as Box<dyn FrameSource>,
                (None, true) => open_camera(&app.config)?,
                (None, false) => bail!("Pass --images DIR or --camera"),
            };

            println!("Enrolling {}...", identity);
            let cancel = CancelToken::new();
            let report = enroller.enroll_from_source(&identity, &mut source, Some(&cancel))?;

            println!("✅ Enrolled {}", report.identity);
            println!("   Source images:   {}", report.source_images);
            println!("   Training images: {} ({} without a face)", report.training_images, report.skipped_images);
            println!("   Embeddings:      +{} (total {})", report.embeddings_added, report.total_embeddings);
            println!(
                "   Consistency:     {:.1}% (avg distance {:.3}){}",
                report.validation.consistency * 100.0,
                report.validation.average_distance,
                if report.validation.is_valid { "" } else { " ⚠️  low, consider re-enrolling" }
            );
        }
        Commands::EnrollBulk { dir } => {
            let roster = app.roster()?;
            if roster.is_empty() {
                bail!("Roster {} is empty; bulk enrollment needs it to map folders", app.paths.roster_file().display());
            }

            let enroller = Enroller::new(&app.capabilities, &app.store, &app.config);
            let report = enroller.enroll_directory_tree(&dir, &roster)?;

            for enrolled in &report.enrolled {
                println!(
                    "✅ {:<24} +{} embeddings ({} total)",
                    roster.display_name(&enrolled.identity),
                    enrolled.embeddings_added,
                    enrolled.total_embeddings
                );
            }
            for (folder, reason) in &report.failed {
                println!("❌ {:<24} {}", folder, reason);
            }
            for folder in &report.unmatched {
                println!("⚠️  {:<24} not on the roster, skipped", folder);
            }
            println!(
                "\n{} enrolled, {} failed, {} unmatched",
                report.enrolled.len(),
                report.failed.len(),
                report.unmatched.len()
            );
        }
        Commands::Attend { frames, preview } => {
            let ledger = app.ledger()?;
            let roster = app.roster()?;
            let engine = RecognitionEngine::new(&app.config.recognition);
            let live = LiveAttendance::new(&app.capabilities, &engine, &app.liveness, &ledger, &app.config.session);

            if app.liveness.status() == LivenessStatus::PermissiveFallback {
                println!("⚠️  No liveness model trained; spoof checks are off");
            }

            let mut source = match frames {
                Some(dir) => Box::new(ImageSequenceSource::from_dir(&dir)?) as Box<dyn FrameSource>,
                None => open_camera(&app.config)?,
            };

            let index = app.store.snapshot();
            let cancel = CancelToken::new();
            let terminal = if preview { Some(TerminalPreview::start()?) } else { None };

            let report = live.run(&index, &mut source, &SystemClock, &cancel, |frame, face, state| {
                if let Some(terminal) = &terminal {
                    terminal.show(frame, face, &describe_state(state), "Press ESC to cancel");
                    if check_for_escape().unwrap_or(false) {
                        cancel.cancel();
                    }
                }
            })?;
            drop(terminal);

            match (&report.state, &report.insert) {
                (SessionState::Accepted { identity, confidence }, Some(InsertOutcome::Inserted)) => {
                    println!("✅ {} marked present ({:.1}% confidence)", roster.display_name(identity), confidence * 100.0);
                }
                (SessionState::Accepted { identity, .. }, _) => {
                    println!("ℹ️  {} was already marked present today", roster.display_name(identity));
                }
                (SessionState::TimedOut, _) => println!("⏱️  Timed out after {} frames, nobody confirmed", report.frames),
                (SessionState::Cancelled, _) => println!("Cancelled"),
                (state, _) => println!("Session ended in {:?}", state),
            }
            if report.spoof_rejections > 0 {
                println!("⚠️  {} liveness rejections during the session", report.spoof_rejections);
            }
        }
        Commands::Batch { image } => {
            let ledger = app.ledger()?;
            let roster = app.roster()?;
            let engine = RecognitionEngine::new(&app.config.recognition);
            let batch = BatchIdentifier::new(&app.capabilities, &engine, &ledger);

            let photo = image::open(&image).with_context(|| format!("Failed to open {}", image.display()))?;
            let now = chrono::Local::now().naive_local();
            let report = batch.identify(&photo, &app.store.snapshot(), now)?;

            println!("Detected {} faces", report.faces_detected);
            for face in &report.faces {
                match &face.resolution {
                    FaceResolution::Identified { identity, confidence } => println!(
                        "  ✅ {:<24} {:.1}%",
                        roster.display_name(identity),
                        confidence * 100.0
                    ),
                    FaceResolution::Unidentified(reason) => {
                        println!("  ❓ unidentified: {}", reason)
                    }
                }
            }
            println!(
                "\n{} identified, {} unidentified, {} new records, {} already present",
                report.identified, report.unidentified, report.new_records, report.duplicates
            );
        }
        Commands::TrainLiveness { real, fake } => {
            let real_images = load_folder(&real)?;
            let fake_images = load_folder(&fake)?;
            println!("Training liveness on {} real / {} fake samples...", real_images.len(), fake_images.len());

            let summary = app.liveness.train(&real_images, &fake_images)?;
            println!(
                "✅ Trained {} epochs (best {}), validation accuracy {:.1}%, loss {:.4}",
                summary.epochs_run,
                summary.best_epoch,
                summary.validation_accuracy * 100.0,
                summary.validation_loss
            );
            println!("   Saved to {}", app.paths.liveness_model_file().display());
        }
        Commands::Status => {
            let roster = app.roster()?;
            println!("{}", app.capabilities.report(&app.liveness));

            let summary = app.store.summary();
            println!(
                "Enrolled: {} identities, {} embeddings ({:.1} avg)\n",
                summary.identities, summary.embeddings, summary.average_per_identity
            );
            for status in app.store.statuses() {
                println!(
                    "  {:<24} {:>4} embeddings  {}",
                    roster.display_name(&status.identity),
                    status.embedding_count,
                    status.rating
                );
            }
        }
        Commands::Today => {
            let ledger = app.ledger()?;
            let roster = app.roster()?;
            let today = chrono::Local::now().date_naive();
            let records = ledger.records_on(today)?;

            println!("Attendance for {} ({} present)", today, records.len());
            for record in records {
                println!(
                    "  {}  {:<24} {:>5.1}%  {:<12} {}",
                    record.time.format("%H:%M:%S"),
                    roster.display_name(&record.identity),
                    record.confidence * 100.0,
                    record.method,
                    record.note
                );
            }
        }
        Commands::Export { file } => {
            app.store.export_json(&file)?;
            println!("✅ Exported {} embeddings to {}", app.store.summary().embeddings, file.display());
        }
        Commands::Import { file } => {
            let summary = app.store.import_json(&file, app.config.storage.max_import_bytes)?;
            println!("✅ Imported {} embeddings for {} identities", summary.embeddings, summary.identities);
            if let Some(backup) = summary.backup {
                println!("   Previous store saved to {}", backup.display());
            }
        }
        Commands::Purge { identity } => {
            let identity = IdentityKey::new(identity);
            let removed = app.store.purge(&identity)?;
            println!("Removed {} embeddings for {}", removed, identity);
        }
        Commands::Reset => {
            app.store.reset()?;
            println!("Embedding store cleared");
        }
    }

    Ok(())
}

fn describe_state(state: &SessionState) -> String {
    match state {
        SessionState::Waiting => "Looking for a face...".to_string(),
        SessionState::Confirming { identity, count } => format!("{} ({})", identity, count),
        SessionState::Accepted { identity, .. } => format!("✓ {}", identity),
        SessionState::TimedOut => "Timed out".to_string(),
        SessionState::Cancelled => "Cancelled".to_string(),
    }
}

fn load_folder(dir: &Path) -> Result<Vec<DynamicImage>> {
    list_images(dir)?
        .iter()
        .map(|path| image::open(path).with_context(|| format!("Failed to open {}", path.display())))
        .collect()
}

#[cfg(feature = "camera")]
fn open_camera(config: &Config) -> Result<Box<dyn FrameSource>> {
    Ok(Box::new(rollcall::camera::V4lCamera::open(&config.camera)?))
}

#[cfg(not(feature = "camera"))]
fn open_camera(_config: &Config) -> Result<Box<dyn FrameSource>> {
    bail!("This build has no camera support; rebuild with --features camera or pass a frames folder")
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }
}
