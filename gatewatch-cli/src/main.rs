use clap::{Parser, Subcommand};
use gatewatch_core::analyze::OnnxFaceAnalyzer;
use gatewatch_core::capture::Camera;
use gatewatch_core::config::Config;
use gatewatch_core::display::{self, FrameSink, Headless, PreviewFile};
use gatewatch_core::server::ServerClient;
use gatewatch_core::{open_source, registry, RunExit, Watcher};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "gatewatch")]
#[command(about = "Camera attendance and intruder alerts", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the system/user lookup
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera and report sightings
    Run {
        /// Replay image files from a directory instead of the camera
        #[arg(long)]
        replay: Option<PathBuf>,
        /// Don't write preview frames
        #[arg(long)]
        headless: bool,
        /// Write annotated frames to this file
        #[arg(long, conflicts_with = "headless")]
        preview: Option<PathBuf>,
    },
    /// Build the reference registry and list known labels
    Registry,
    /// Upload a photo of a new student
    Enroll {
        /// Student name
        name: String,
        /// Photo file (JPEG or PNG)
        photo: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
    /// Capture a snapshot from the camera
    Snapshot {
        /// Output file path
        output: PathBuf,
    },
    /// Query the server status
    Status,
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            replay,
            headless,
            preview,
        } => cmd_run(config, replay, headless, preview),
        Commands::Registry => cmd_registry(config),
        Commands::Enroll { name, photo } => cmd_enroll(config, name, photo),
        Commands::Devices => cmd_devices(config),
        Commands::Snapshot { output } => cmd_snapshot(config, output),
        Commands::Status => cmd_status(config),
        Commands::Config { validate } => cmd_config(config, validate),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    Ok(config)
}

/// Raise the returned flag once `q` is entered on stdin.
fn spawn_quit_listener() -> Arc<AtomicBool> {
    let quit = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&quit);

    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) if line.trim() == "q" => {
                    flag.store(true, Ordering::Relaxed);
                    break;
                }
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    quit
}

fn cmd_run(
    config: Config,
    replay: Option<PathBuf>,
    headless: bool,
    preview: Option<PathBuf>,
) -> anyhow::Result<()> {
    let start = Instant::now();
    let mut watcher = Watcher::from_config(&config)?;
    log::debug!("Startup took {}ms", start.elapsed().as_millis());

    let mut source = open_source(&config, replay.as_deref())?;

    let mut sink: Box<dyn FrameSink> = if headless {
        Box::new(Headless)
    } else if let Some(path) = preview {
        Box::new(PreviewFile::new(path, config.display.preview_every))
    } else {
        display::from_config(&config.display)
    };

    let quit = spawn_quit_listener();
    let summary = watcher.run(source.as_mut(), sink.as_mut(), &quit);

    println!();
    match summary.exit {
        RunExit::Quit => println!("Stopped by user"),
        RunExit::StreamEnded => println!("Video stream ended"),
    }
    println!("Frames:           {}", summary.frames);
    println!("Detection cycles: {}", summary.detection_cycles);
    println!("Events sent:      {}", summary.events);
    println!("Elapsed:          {:.1}s", start.elapsed().as_secs_f64());

    Ok(())
}

fn cmd_registry(config: Config) -> anyhow::Result<()> {
    let mut analyzer = OnnxFaceAnalyzer::from_config(&config)?;
    let client = ServerClient::new(&config.server)?;
    let registry = registry::load(&config, &mut analyzer, &client);

    if registry.is_empty() {
        println!("No known faces. Everyone will be reported as Unknown.");
        return Ok(());
    }

    println!("{:<30} {}", "Label", "Photos");
    println!("{}", "-".repeat(40));
    for (label, count) in registry.label_counts() {
        println!("{:<30} {}", label, count);
    }
    println!();
    println!("{} reference faces", registry.len());

    Ok(())
}

fn cmd_enroll(config: Config, name: String, photo: PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(&photo)?;
    let format = image::guess_format(&bytes)?;
    image::load_from_memory_with_format(&bytes, format)?;

    let mime = format.to_mime_type();
    let file_name = photo
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".to_string());

    println!("Registering {} from {}", name, photo.display());

    let client = ServerClient::new(&config.server)?;
    let response = client.register_student(&name, bytes, &file_name, mime)?;

    println!("✓ Student registered");
    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}

fn cmd_devices(config: Config) -> anyhow::Result<()> {
    let devices = Camera::list_devices()?;

    if devices.is_empty() {
        println!("No video devices found");
        return Ok(());
    }

    for device in devices {
        let marker = if device == config.camera.device { "*" } else { " " };
        println!("{} {}", marker, device);
    }

    Ok(())
}

fn cmd_snapshot(config: Config, output: PathBuf) -> anyhow::Result<()> {
    println!("Capturing snapshot to: {}", output.display());

    let mut camera = Camera::new(&config.camera)?;
    let frame = camera.capture_frame()?;
    frame.save(&output)?;

    println!("✓ Snapshot saved: {}", output.display());
    println!("Resolution: {}x{}", frame.width(), frame.height());

    Ok(())
}

fn cmd_status(config: Config) -> anyhow::Result<()> {
    let client = ServerClient::new(&config.server)?;
    let status = client.status()?;

    println!("Server: {}", client.base_url());
    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}

fn cmd_config(config: Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[camera]");
    println!("  device = {:?}", config.camera.device);
    println!("  resolution = {}x{}", config.camera.width, config.camera.height);
    println!();

    println!("[detection]");
    println!("  model = {:?}", config.detection.model_path);
    println!(
        "  confidence_threshold = {}",
        config.detection.confidence_threshold
    );
    println!("  input_size = {}", config.detection.input_size);
    println!();

    println!("[embedding]");
    println!("  model = {:?}", config.embedding.model_path);
    println!();

    println!("[matching]");
    println!("  threshold = {}", config.matching.threshold);
    println!("  skip_frames = {}", config.matching.skip_frames);
    println!("  detection_scale = {}", config.matching.detection_scale);
    println!();

    println!("[cooldown]");
    println!("  unknown = {}s", config.cooldown.unknown_secs);
    println!("  known = {}s", config.cooldown.known_secs);
    println!();

    println!("[registry]");
    println!("  source = {:?}", config.registry.source);
    println!("  faces_dir = {:?}", config.registry.faces_dir);
    println!();

    println!("[server]");
    println!("  url = {}", config.server.url);
    println!("  timeout = {}s", config.server.timeout_secs);
    println!();

    println!("[display]");
    match &config.display.preview_path {
        Some(path) => println!("  preview_path = {:?}", path),
        None => println!("  preview_path = (headless)"),
    }
    println!("  preview_every = {}", config.display.preview_every);

    Ok(())
}
