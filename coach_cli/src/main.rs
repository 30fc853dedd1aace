use clap::{Parser, Subcommand};
use coach_core::catalog::{PUSHUP_ID, SQUAT_ID};
use coach_core::classifier::blank_landmarks;
use coach_core::config::CountingConfig;
use coach_core::history::{export_csv, read_records, HistorySink, JsonlSink, SessionRecord};
use coach_core::lifecycle::start_workout;
use coach_core::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "repcoach")]
#[command(about = "Real-time rep counting and workout session engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a simulated workout session end-to-end (default)
    Simulate {
        /// Exercise to simulate (squat, pushup)
        #[arg(long, default_value = "squat")]
        exercise: String,

        /// Level to attempt
        #[arg(long, default_value_t = 1)]
        level: u32,

        /// Insert a pause/resume cycle midway through the workout
        #[arg(long)]
        with_pause: bool,

        /// Inject one incomplete rep (push-up only)
        #[arg(long)]
        with_failure: bool,
    },

    /// Show completed sessions from history
    History {
        /// Maximum number of records to show
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Export history to CSV
    Export,
}

fn main() -> Result<()> {
    // Initialize logging
    coach_core::logging::init();

    let cli = Cli::parse();

    let config = Config::load()?;
    let data_dir = cli.data_dir.unwrap_or_else(|| config.data.data_dir.clone());

    match cli.command {
        Some(Commands::Simulate {
            exercise,
            level,
            with_pause,
            with_failure,
        }) => cmd_simulate(data_dir, &exercise, level, with_pause, with_failure, &config),
        Some(Commands::History { limit }) => cmd_history(data_dir, limit),
        Some(Commands::Export) => cmd_export(data_dir),
        None => cmd_simulate(data_dir, "squat", 1, false, false, &config),
    }
}

fn history_path(data_dir: &PathBuf) -> PathBuf {
    data_dir.join("history.jsonl")
}

fn cmd_simulate(
    data_dir: PathBuf,
    exercise: &str,
    level: u32,
    with_pause: bool,
    with_failure: bool,
    config: &Config,
) -> Result<()> {
    const USER_ID: u64 = 1;
    const RECV_TIMEOUT: Duration = Duration::from_secs(10);

    let (exercise_id, kind) = match exercise.to_lowercase().as_str() {
        "squat" => (SQUAT_ID, ExerciseKind::Squat),
        "pushup" | "push-up" => (PUSHUP_ID, ExerciseKind::Pushup),
        other => {
            return Err(Error::Other(format!(
                "unknown exercise: {} (expected squat or pushup)",
                other
            )))
        }
    };

    if with_failure && kind != ExerciseKind::Pushup {
        eprintln!("--with-failure only applies to push-ups; ignoring.");
    }

    let store = Arc::new(MemoryStore::with_default_catalog());

    // Unlock the requested level for the simulated user
    if level > 1 {
        let mut progress = UserExerciseProgress::new(USER_ID, exercise_id);
        progress.current_level = level;
        progress.highest_completed_level = level - 1;
        store.upsert_progress(progress)?;
    }

    let exercise_level = store.level(exercise_id, level)?;
    let total_reps = exercise_level.target_sets * exercise_level.target_reps;

    let frames = script_frames(kind, total_reps, with_failure);
    let frame_count = frames.len();
    let classifier = Arc::new(ScriptedClassifier::new(frames));

    let (session, socket) = start_workout(&*store, USER_ID, exercise_id, level)?;
    println!(
        "Started {} workout, level {} ({} sets x {} reps)",
        exercise, level, exercise_level.target_sets, exercise_level.target_reps
    );

    let registry = Arc::new(SessionRegistry::new());
    let (in_tx, in_rx) = crossbeam_channel::unbounded::<String>();
    let (out_tx, out_rx) = crossbeam_channel::unbounded::<Outbound>();

    let mut connection = Connection::open(
        store.clone(),
        classifier,
        registry,
        socket.socket_session_id,
        out_tx,
        CountingConfig {
            threshold: config.counting.threshold,
            poll_interval_ms: config.counting.poll_interval_ms,
        },
    )?;
    let connection_thread = std::thread::spawn(move || connection.run(in_rx));

    // Scripted client: heartbeat, status probe, then the pose frames,
    // with an optional pause/resume cycle halfway through
    {
        let send = |message: Inbound| {
            let _ = in_tx.send(message.to_wire());
        };

        send(Inbound::Heartbeat { timestamp: None });
        send(Inbound::GetStatus);

        let halfway = frame_count / 2;
        for i in 0..frame_count {
            if with_pause && i == halfway {
                send(Inbound::Pause);
                send(Inbound::Resume);
            }
            send(Inbound::PoseFrame {
                landmarks: blank_landmarks(),
            });
        }
    }

    // Drain feedback until the engine reports completion
    let mut completed = false;
    while let Ok(message) = out_rx.recv_timeout(RECV_TIMEOUT) {
        println!("← {}", serde_json::to_string(&message)?);
        if matches!(message, Outbound::WorkoutCompleted {}) {
            completed = true;
            break;
        }
    }

    drop(in_tx);
    connection_thread
        .join()
        .map_err(|_| Error::Other("connection thread panicked".into()))??;

    if !completed {
        return Err(Error::Other(
            "simulation ended without workout completion".into(),
        ));
    }

    // Record the completed session in the append-only history
    let detail = store.session_detail(session.session_id)?;
    let summary = CompletionSummary {
        session_id: session.session_id,
        total_reps_completed: detail.session.total_reps_completed,
        total_reps_failed: detail.session.total_reps_failed,
        total_calories_burned: detail.session.total_calories_burned,
        duration_seconds: detail.session.duration_seconds,
        duration_minutes: (detail.session.duration_seconds / 60.0 * 100.0).round() / 100.0,
        experience_gained: detail.level.experience_points,
    };
    let mut sink = JsonlSink::new(history_path(&data_dir));
    sink.append(&SessionRecord::from_completion(&detail, &summary))?;

    println!("\n✓ Workout complete!");
    println!("  Reps:       {}", summary.total_reps_completed);
    println!("  Failed:     {}", summary.total_reps_failed);
    println!("  Calories:   {:.1}", summary.total_calories_burned);
    println!("  Duration:   {:.1}s", summary.duration_seconds);
    println!("  Experience: {}", summary.experience_gained);

    Ok(())
}

/// Build the scripted classifier output: one down/up frame pair per rep,
/// optionally preceded by one incomplete push-up rep.
fn script_frames(kind: ExerciseKind, total_reps: u32, with_failure: bool) -> Vec<ClassifiedPose> {
    let mut frames = Vec::new();

    if with_failure && kind == ExerciseKind::Pushup {
        // up -> mid -> up: counts as a failed attempt
        frames.push(ClassifiedPose::ThreeClass {
            down: 0.05,
            up: 0.05,
            mid: 0.9,
        });
        frames.push(ClassifiedPose::ThreeClass {
            down: 0.05,
            up: 0.9,
            mid: 0.05,
        });
    }

    for _ in 0..total_reps {
        match kind {
            ExerciseKind::Squat => {
                frames.push(ClassifiedPose::TwoClass {
                    position: Position::Down,
                    confidence: 0.92,
                });
                frames.push(ClassifiedPose::TwoClass {
                    position: Position::Up,
                    confidence: 0.94,
                });
            }
            ExerciseKind::Pushup => {
                frames.push(ClassifiedPose::ThreeClass {
                    down: 0.9,
                    up: 0.05,
                    mid: 0.05,
                });
                frames.push(ClassifiedPose::ThreeClass {
                    down: 0.05,
                    up: 0.9,
                    mid: 0.05,
                });
            }
        }
    }

    frames
}

fn cmd_history(data_dir: PathBuf, limit: usize) -> Result<()> {
    let records = read_records(&history_path(&data_dir))?;

    if records.is_empty() {
        println!("No completed workouts in history.");
        return Ok(());
    }

    println!("Completed workouts (most recent first):");
    for record in records.iter().rev().take(limit) {
        println!(
            "  {} | {} level {} | {} reps ({} failed) | {:.1} cal | {:.1}s | +{} xp",
            record.completed_at.format("%Y-%m-%d %H:%M"),
            record.exercise,
            record.level,
            record.total_reps_completed,
            record.total_reps_failed,
            record.total_calories_burned,
            record.duration_seconds,
            record.experience_gained,
        );
    }

    Ok(())
}

fn cmd_export(data_dir: PathBuf) -> Result<()> {
    let history = history_path(&data_dir);
    if !history.exists() {
        println!("No history file found - nothing to export.");
        return Ok(());
    }

    let csv_path = data_dir.join("history.csv");
    let count = export_csv(&history, &csv_path)?;

    println!("✓ Exported {} sessions to CSV", count);
    println!("  CSV: {}", csv_path.display());

    Ok(())
}
