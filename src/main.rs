use rollcall::{
    camera,
    common::{system_config_file, system_models_dir, user_config_file},
    AttendanceLedger, AttendanceSystem, Config, Detection, DevMode, FaceEmbedder, OnnxEmbedder,
    RollcallError, V4l2Opener, MULTIPART_CONTENT_TYPE,
};

use clap::{Parser, Subcommand};
use anyhow::{Context as _, Result};
use image::DynamicImage;
use std::fs::File;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Face recognition attendance")]
struct Cli {
    /// Enable development mode (saves data under ./dev_data)
    #[arg(long, global = true)]
    dev: bool,

    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    DetectCamera,
    /// Capture enrollment images for one person
    Collect {
        #[arg(short, long)]
        name: String,
        /// Number of images to capture
        #[arg(short, long, default_value = "5")]
        count: u32,
        /// Delay between captures
        #[arg(short, long, default_value = "2000")]
        interval_ms: u64,
    },
    /// Rebuild the gallery from enrollment images
    Encode {
        #[arg(long)]
        json: bool,
    },
    /// Recognize faces and record attendance
    Attend {
        /// Stop after this many seconds (runs until killed otherwise)
        #[arg(short, long)]
        seconds: Option<u64>,
        /// Write the annotated multipart/x-mixed-replace stream here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show today's attendance
    Records {
        #[arg(long)]
        json: bool,
    },
}

/// Stand-in for collection runs, which never look for faces.
struct NoModels;

impl FaceEmbedder for NoModels {
    fn embed(&self, _image: &DynamicImage) -> rollcall::Result<Vec<Detection>> {
        Err(RollcallError::Model("face models are not loaded".into()))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = load_config(cli.config.as_ref(), &dev_mode)?;
    let paths = dev_mode.storage_paths(&config);

    match cli.command {
        Commands::DetectCamera => {
            let cameras = camera::list_cameras()?;
            if cameras.is_empty() {
                println!("❌ No cameras found!");
                println!("  Ensure you have permission to access /dev/video*");
                return Ok(());
            }

            for cam in &cameras {
                println!("📷 /dev/video{}: {}", cam.index, cam.name);
                println!("   formats: {}", cam.formats.join(", "));
                if !cam.can_capture {
                    println!("   (no VIDEO_CAPTURE capability)");
                }
            }
            println!("\nSet [camera] device_index in the config to choose one.");
        }
        Commands::Collect { name, count, interval_ms } => {
            let system = AttendanceSystem::new(
                &config,
                paths,
                Box::new(V4l2Opener::new(&config)),
                Arc::new(NoModels),
            )?;

            let name = system.start_collection(&name)?;
            println!(
                "Collecting {} images for {} into {}",
                count,
                name,
                system.enrollment_dir().join(&name).display()
            );

            let mut captured = 0;
            while captured < count {
                thread::sleep(Duration::from_millis(interval_ms));
                match system.capture_image() {
                    Ok(n) => {
                        captured = n;
                        println!("Image {} captured for {}", n, name);
                    }
                    Err(RollcallError::FrameUnavailable) => {
                        tracing::warn!("Could not capture frame, retrying");
                    }
                    Err(e) => {
                        system.stop_collection()?;
                        return Err(e.into());
                    }
                }
            }

            let summary = system.stop_collection()?;
            println!("✅ Captured {} images for {}", summary.captured, summary.name);
        }
        Commands::Encode { json } => {
            let system = AttendanceSystem::new(
                &config,
                paths,
                Box::new(V4l2Opener::new(&config)),
                load_embedder(&config, &dev_mode)?,
            )?;

            let (gallery, report) = system.rebuild_gallery()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for file in &report.files {
                    println!("{}", file);
                }
                println!(
                    "\nEncoded {} faces for {} identities ({} without a face, {} errors)",
                    gallery.len(),
                    gallery.identities().len(),
                    report.no_face(),
                    report.errors()
                );
            }
        }
        Commands::Attend { seconds, output } => {
            let system = AttendanceSystem::new(
                &config,
                paths,
                Box::new(V4l2Opener::new(&config)),
                load_embedder(&config, &dev_mode)?,
            )?;

            let mut sink: Box<dyn Write + Send> = match &output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    println!("Writing {} stream to {}", MULTIPART_CONTENT_TYPE, path.display());
                    Box::new(file)
                }
                None => Box::new(io::sink()),
            };

            system.start_attendance()?;
            println!("Attendance system started");

            let stream = system.stream_frames()?;
            let consumer = thread::spawn(move || -> io::Result<(usize, Option<Vec<u8>>)> {
                let mut frames = 0;
                let mut last = None;
                for frame in stream {
                    sink.write_all(&frame.multipart_chunk())?;
                    frames += 1;
                    last = Some(frame.jpeg);
                }
                sink.flush()?;
                Ok((frames, last))
            });

            if let Some(seconds) = seconds {
                thread::sleep(Duration::from_secs(seconds));
                system.stop_attendance()?;
            }

            let (frames, last) = consumer
                .join()
                .map_err(|_| anyhow::anyhow!("frame consumer panicked"))??;
            println!("Attendance system stopped after {} frames", frames);

            if let (true, Some(jpeg)) = (dev_mode.is_enabled(), last) {
                let path = dev_mode.get_capture_path("attendance");
                std::fs::write(&path, jpeg)?;
                println!("🖼️  Last frame saved to {}", path.display());
            }
            print_records(&system.list_today_records()?, false)?;
        }
        Commands::Records { json } => {
            let ledger = AttendanceLedger::new(paths.ledger_dir)?;
            print_records(&ledger.list_today()?, json)?;
        }
    }

    Ok(())
}

fn print_records(records: &[rollcall::AttendanceRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    let date = chrono::Local::now().format("%Y-%m-%d");
    if records.is_empty() {
        println!("No attendance recorded for {}", date);
        return Ok(());
    }

    println!("Attendance for {}:", date);
    for record in records {
        println!("  {:<24} {}", record.name, record.time);
    }
    Ok(())
}

fn load_config(explicit: Option<&PathBuf>, dev_mode: &DevMode) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(Config::load_from_path(path)?);
    }

    let mut candidates = vec![PathBuf::from("configs/rollcall.toml")];
    if !dev_mode.is_enabled() {
        candidates.insert(0, system_config_file());
        candidates.extend(user_config_file());
    }

    match candidates.iter().find(|p| p.exists()) {
        Some(path) => Ok(Config::load_from_path(path)?),
        None => {
            tracing::warn!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

fn load_embedder(config: &Config, dev_mode: &DevMode) -> Result<Arc<dyn FaceEmbedder>> {
    let embedder = if dev_mode.is_enabled() {
        OnnxEmbedder::new(config)?
    } else {
        OnnxEmbedder::new_with_model_path(config, &system_models_dir())?
    };
    Ok(Arc::new(embedder))
}

fn setup_logging(dev_mode: bool) {
    if dev_mode {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt().with_writer(io::stderr).init();
    }
}
