use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use clip_flow::clip::{Clip, Priority};
use clip_flow::config::{self, Config};
use clip_flow::delivery::FfmpegSink;
use clip_flow::ordering::baseline_order;
use clip_flow::scheduler::Scheduler;
use clip_flow::state::StateStore;
use clip_flow::store::PlaylistStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clipflow", about = "Continuous clip scheduling engine", version)]
struct Cli {
    /// Playlist store (JSON). Relative clip paths resolve against its directory.
    #[arg(long, global = true, env = "CLIPFLOW_PLAYLIST")]
    playlist: Option<PathBuf>,
    /// Engine state file (JSON)
    #[arg(long, global = true, env = "CLIPFLOW_STATE")]
    state: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling engine until interrupted
    Run(RunArgs),
    /// Show the persisted engine state
    Status,
    /// Show the baseline pass order for the current playlist
    Order,
    /// Add a clip to the playlist store
    Add {
        /// Media file (relative to the playlist directory, or absolute)
        path: String,
        /// Clip id (default: file stem plus a timestamp)
        #[arg(long)]
        id: Option<String>,
        /// pinned, breaking, normal or filler
        #[arg(short, long, default_value = "normal")]
        priority: String,
        /// Ordinal for pinned clips
        #[arg(long)]
        position: Option<i64>,
        /// Display title
        #[arg(short, long)]
        title: Option<String>,
    },
    /// Remove a clip from the playlist store by id
    Remove { id: String },
    /// Drop all breaking clips from the playlist store now
    Prune,
}

#[derive(Args)]
struct RunArgs {
    /// Output destination (e.g. rtmp://host/app/key)
    #[arg(long, env = "CLIPFLOW_SINK_URL")]
    sink: String,
    /// Working directory the engine must be able to create
    #[arg(long, env = "CLIPFLOW_WORK_DIR")]
    work_dir: Option<PathBuf>,
    /// ffmpeg binary
    #[arg(long, env = "FFMPEG_BIN", default_value = "ffmpeg")]
    ffmpeg: String,
    /// Seconds between polls while the playlist is empty or unreadable
    #[arg(long, default_value_t = 10)]
    poll_secs: u64,
    /// Transition filler length in seconds
    #[arg(long, default_value_t = 1.0)]
    transition_secs: f64,
    /// Let one breaking clip pre-empt every remaining step of a pass
    #[arg(long)]
    repeat_breaking: bool,
    /// Transition frame size (WIDTHxHEIGHT)
    #[arg(long, default_value = "1280x720")]
    video_size: String,
    #[arg(long, default_value_t = 30)]
    frame_rate: u32,
}

enum Exit {
    Signal,
    Finished,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();
    let root = config::default_root();
    let playlist_path = cli.playlist.unwrap_or_else(|| root.join("playlist.json"));
    let state_path = cli.state.unwrap_or_else(|| root.join("engine_state.json"));

    match cli.command {
        Commands::Run(args) => {
            if args.transition_secs < 0.0 || !args.transition_secs.is_finite() {
                eprintln!("Error: transition length must be >= 0");
                return ExitCode::FAILURE;
            }
            let mut cfg = Config::with_sink(args.sink);
            cfg.playlist_path = playlist_path;
            cfg.state_path = state_path;
            if let Some(dir) = args.work_dir {
                cfg.work_dir = dir;
            }
            cfg.ffmpeg_bin = args.ffmpeg;
            cfg.poll_interval = Duration::from_secs(args.poll_secs.max(1));
            cfg.transition = Duration::from_secs_f64(args.transition_secs);
            cfg.repeat_breaking = args.repeat_breaking;
            cfg.video_size = args.video_size;
            cfg.frame_rate = args.frame_rate;
            run_engine(cfg)
        }
        Commands::Status => {
            let states = StateStore::new(&state_path);
            match states.read() {
                Ok(Some(s)) => {
                    println!("clipFlow engine v{}", env!("CARGO_PKG_VERSION"));
                    println!(
                        "Running: {} | Passes: {} | Clips played: {} | Errors: {}",
                        s.running, s.loop_count, s.clips_played, s.errors
                    );
                    if let Some(started) = s.started_at {
                        println!("First started: {}", started.to_rfc3339());
                    }
                    if let Some(done) = s.last_pass_completed_at {
                        println!("Last pass completed: {}", done.to_rfc3339());
                    }
                    if let (Some(id), Some(idx)) = (&s.current_clip_id, s.current_index) {
                        let tier = s.current_tier.map(|t| t.to_string()).unwrap_or_default();
                        println!("Current clip: [{}] {} {}", idx + 1, id, tier);
                    }
                }
                Ok(None) => println!("No engine state at {}", state_path.display()),
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Commands::Order => {
            let store = PlaylistStore::new(&playlist_path);
            let playlist = match store.load() {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            if playlist.is_empty() {
                println!("Playlist is empty. Use 'add <path>' to queue a clip.");
                return ExitCode::SUCCESS;
            }
            println!(
                "{:<4} {:<20} {:<9} {:>4} {:<25} {}",
                "#", "Id", "Tier", "Pos", "Added", "Title"
            );
            println!("{}", "-".repeat(80));
            for (i, clip) in baseline_order(&playlist).iter().enumerate() {
                let missing = if clip.resolve(store.base_dir()).is_file() {
                    " "
                } else {
                    "!"
                };
                println!(
                    "{}{:<3} {:<20} {:<9} {:>4} {:<25} {}",
                    missing,
                    i + 1,
                    truncate(&clip.id, 19),
                    clip.priority,
                    clip.position.map(|p| p.to_string()).unwrap_or_default(),
                    clip.added_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                    truncate(clip.label(), 30)
                );
            }
            ExitCode::SUCCESS
        }
        Commands::Add {
            path,
            id,
            priority,
            position,
            title,
        } => {
            let priority = match Priority::from_str_loose(&priority) {
                Ok(p) => p,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    return ExitCode::FAILURE;
                }
            };
            let now = Utc::now();
            let id = id.unwrap_or_else(|| {
                let stem = std::path::Path::new(&path)
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "clip".to_string());
                format!("{}-{}", stem, now.timestamp_millis())
            });
            let mut clip = Clip::new(id, path, priority);
            clip.position = position;
            clip.added_at = Some(now);
            clip.title = title;

            let store = PlaylistStore::new(&playlist_path);
            let summary = format!("{} ({}) -> {}", clip.id, clip.priority, clip.path);
            match store.add_clip(clip) {
                Ok(()) => {
                    println!("Added: {}", summary);
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    eprintln!("Error: {}", e);
                    ExitCode::FAILURE
                }
            }
        }
        Commands::Remove { id } => match PlaylistStore::new(&playlist_path).remove_clip(&id) {
            Ok(clip) => {
                println!("Removed: {} ({})", clip.id, clip.priority);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Prune => match PlaylistStore::new(&playlist_path).prune_breaking() {
            Ok(n) => {
                println!("Pruned {} breaking clip(s).", n);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                ExitCode::FAILURE
            }
        },
    }
}

/// Start the scheduler on its own thread and wait for either a stop signal
/// or the scheduler finishing. On a signal the state is marked stopped and
/// the process exits without waiting for the in-flight delivery.
fn run_engine(cfg: Config) -> ExitCode {
    if let Err(e) = cfg.prepare() {
        error!(error = %e, "Cannot prepare working storage");
        return ExitCode::FAILURE;
    }

    let states = Arc::new(StateStore::new(&cfg.state_path));
    let state = states.load_merged();
    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = mpsc::channel::<Exit>();

    let signal_tx = tx.clone();
    let signal_flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        signal_flag.store(false, Ordering::SeqCst);
        let _ = signal_tx.send(Exit::Signal);
    }) {
        error!(error = %e, "Failed to install signal handler");
        return ExitCode::FAILURE;
    }

    let sink = FfmpegSink::from_config(&cfg);
    let scheduler = Scheduler::new(cfg, sink, states.clone(), running);
    let spawned = thread::Builder::new()
        .name("scheduler".into())
        .spawn(move || {
            scheduler.run(state);
            let _ = tx.send(Exit::Finished);
        });
    if let Err(e) = spawned {
        error!(error = %e, "Failed to spawn scheduler thread");
        return ExitCode::FAILURE;
    }

    match rx.recv() {
        Ok(Exit::Signal) => {
            info!("Stop requested; persisting engine state");
            if let Err(e) = states.mark_stopped() {
                error!(error = %e, "Failed to persist engine state on shutdown");
            }
            ExitCode::SUCCESS
        }
        Ok(Exit::Finished) | Err(_) => ExitCode::SUCCESS,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max - 1).collect();
        format!("{}…", head)
    } else {
        s.to_string()
    }
}
