use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use glimpse_hw::{Camera, CameraSource};

mod analyzer;
mod config;
mod console;
mod engine;
mod overlay;
mod surface;

use analyzer::RemoteAnalyzer;
use config::Config;
use surface::ConsoleSurface;

/// How long shutdown waits for the engine to release the camera.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "glimpse", about = "Webcam liveness check, face enrollment and recognition")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session (default)
    Run,
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
        Commands::Test => camera_test(&config),
    }
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(
        device = %config.camera_device,
        interval_ms = config.tick_interval_ms,
        "glimpse starting"
    );

    let analyzer = RemoteAnalyzer::connect(&config)
        .await
        .context("face-analysis service unreachable")?;
    let source = CameraSource::new(
        config.camera_device.clone(),
        config.frame_width,
        config.frame_height,
    );
    let surface = ConsoleSurface::new(config.overlay_path.clone());
    let engine = engine::spawn_engine(&config, source, analyzer, surface)?;

    tracing::info!("glimpse ready");

    // Plain OS thread: a pending stdin read must not hold up runtime shutdown.
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let console_engine = engine.clone();
    let rt = tokio::runtime::Handle::current();
    std::thread::Builder::new()
        .name("glimpse-console".into())
        .spawn(move || {
            console::run(console_engine, rt);
            let _ = done_tx.send(());
        })?;

    tokio::select! {
        _ = done_rx => {}
        result = tokio::signal::ctrl_c() => result?,
    }

    tracing::info!("glimpse shutting down");
    // A signal can arrive while the engine thread is parked in the name prompt.
    if let Err(e) = engine.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!(error = %e, "engine did not stop cleanly");
    }
    Ok(())
}

fn camera_test(config: &Config) -> Result<()> {
    println!("Running camera diagnostics on {}...", config.camera_device);
    let camera = Camera::open(&config.camera_device, config.frame_width, config.frame_height)?;
    println!(
        "  format: {} ({:?}) {}x{}",
        camera.fourcc,
        camera.pixel_format(),
        camera.width,
        camera.height
    );

    let frame = camera.capture_frame()?;
    println!(
        "  frame #{}: {} bytes, brightness {:.1}, dark: {}",
        frame.sequence,
        frame.data.len(),
        frame.avg_brightness(),
        frame.is_dark
    );

    let display = config.display_size((frame.width, frame.height));
    println!("  display size: {}x{}", display.0, display.1);
    Ok(())
}
