//! Expiry Scan command line
//!
//! Offline tools around the scanner pipeline: crop geometry, date parsing,
//! a scripted end-to-end simulation and configuration management.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use expiry_scan::analysis::ScanState;
use expiry_scan::capture::{FramePlane, RawFrame, Rotation};
use expiry_scan::config::{default_config_path, load_config, save_config, AppConfig};
use expiry_scan::shared::ScanStats;
use expiry_scan::vision::{compute_crop, ScriptedRecognizer};
use expiry_scan::ExpiryScanner;

/// Expiry Scan - live expiry date scanner
#[derive(Parser, Debug)]
#[command(name = "expiry-scan")]
#[command(about = "Find expiry dates in camera frames")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the scan window for a raw frame size and sensor rotation
    Crop {
        #[arg(long)]
        width: u32,
        #[arg(long)]
        height: u32,
        /// Clockwise rotation in degrees (0, 90, 180, 270)
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        rotation: i32,
    },
    /// Extract an expiry date from a line of recognized text
    Parse {
        text: String,
        /// Year used when the text has none
        #[arg(long)]
        year: Option<i32>,
    },
    /// Run the full pipeline on synthetic frames with scripted recognizer output
    Simulate {
        /// Recognizer output per admitted frame, in order
        #[arg(long = "text", required = true)]
        texts: Vec<String>,
        #[arg(long, default_value = "1280")]
        width: u32,
        #[arg(long, default_value = "720")]
        height: u32,
        #[arg(long, default_value = "90", allow_negative_numbers = true)]
        rotation: i32,
        /// Number of frames to feed
        #[arg(long, default_value = "10")]
        frames: u32,
        /// Spacing between frame timestamps
        #[arg(long, default_value = "200")]
        interval_ms: u64,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the active configuration, or write the defaults to disk
    Config {
        /// Write the default configuration to the config path
        #[arg(long)]
        write: bool,
    },
}

#[derive(Serialize)]
struct SimulationReport {
    state: ScanState,
    stats: ScanStats,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Crop { width, height, rotation } => {
            let config = load_or_default_config(args.config.as_ref())?;
            let rect = compute_crop(width, height, Rotation::from_degrees(rotation), &config.region);
            println!(
                "left={} top={} width={} height={}",
                rect.left, rect.top, rect.width, rect.height
            );
        }
        Command::Parse { text, year } => {
            let config = load_or_default_config(args.config.as_ref())?;
            let extractor = config.date_extractor();
            let date = match year {
                Some(year) => extractor.extract(&text, year),
                None => extractor.extract_now(&text),
            };
            match date {
                Some(date) => println!("{}", date),
                None => println!("no date found"),
            }
        }
        Command::Simulate {
            texts,
            width,
            height,
            rotation,
            frames,
            interval_ms,
            json,
        } => {
            let config = load_or_default_config(args.config.as_ref())?;
            let report = simulate(&config, &texts, width, height, rotation, frames, interval_ms)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                match report.state.date() {
                    Some(date) => println!("{}: {}", report.state.name(), date),
                    None => println!("{}", report.state.name()),
                }
                println!(
                    "frames: {} received, {} admitted, {} dropped",
                    report.stats.frames_received,
                    report.stats.frames_admitted,
                    report.stats.frames_dropped()
                );
            }
        }
        Command::Config { write } => {
            if write {
                let path = match &args.config {
                    Some(path) => path.clone(),
                    None => default_config_path()?,
                };
                save_config(&AppConfig::default(), &path)?;
                info!("Wrote default configuration to {:?}", path);
            } else {
                let config = load_or_default_config(args.config.as_ref())?;
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Explicit path must load; the default location is optional
fn load_or_default_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    if let Some(path) = path {
        let config = load_config(path)?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    match default_config_path() {
        Ok(path) if path.exists() => match load_config(&path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return Ok(config);
            }
            Err(e) => warn!("Ignoring configuration at {:?}: {:#}", path, e),
        },
        Ok(_) => {}
        Err(e) => warn!("No configuration directory: {}", e),
    }

    info!("Using default configuration");
    Ok(AppConfig::default())
}

fn simulate(
    config: &AppConfig,
    texts: &[String],
    width: u32,
    height: u32,
    rotation: i32,
    frames: u32,
    interval_ms: u64,
) -> Result<SimulationReport> {
    if width == 0 || height == 0 {
        bail!("frame size must be non-zero, got {}x{}", width, height);
    }

    let recognizer = Arc::new(
        ScriptedRecognizer::from_lines(texts.iter().map(String::as_str)).with_delay(Duration::from_millis(20)),
    );
    let mut scanner = ExpiryScanner::start(config, recognizer)?;

    let row_bytes = width as usize * 4;
    let start = Instant::now();
    for index in 0..frames {
        if scanner.state().is_locked() {
            break;
        }

        let plane = FramePlane::packed_rgba(vec![0; row_bytes * height as usize], width);
        let timestamp = start + Duration::from_millis(interval_ms * u64::from(index));
        scanner.submit_frame(RawFrame::with_planes(vec![plane], width, height, rotation, timestamp));

        // Let the pipeline settle before the next frame arrives
        std::thread::sleep(Duration::from_millis(interval_ms.min(50)));
        scanner.wait_for_state(Duration::from_millis(500), |state| !matches!(state, ScanState::Analyzing));
    }

    scanner.wait_for_state(Duration::from_secs(1), |state| !matches!(state, ScanState::Analyzing));
    let report = SimulationReport {
        state: scanner.state(),
        stats: scanner.stats(),
    };
    scanner.shutdown();

    if let Some(date) = report.state.date() {
        info!(date = %date, "Simulation froze on a date");
    }
    Ok(report)
}
