use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use label_scanner_lib::{
    init_config, init_logging, initialize, load_config, probe, CameraDevice, EventCallback,
    ReplayCamera, ScanEvent, ScannerConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Config file, defaults to the platform config directory
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Detection service base URL, overrides the config file
    #[arg(long, global = true, env = "LABEL_SCANNER_SERVER", value_name = "URL")]
    pub server: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan one image and print the label as JSON
    Still {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,
    },
    /// Scan a directory of images as a camera feed until a label is captured
    Replay {
        #[arg(value_name = "DIR")]
        dir: PathBuf,
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
    /// Scan from a V4L2 webcam until a label is captured
    #[cfg(feature = "v4l_camera")]
    Camera {
        #[arg(long, default_value = "/dev/video0")]
        device: String,
        #[arg(long, default_value_t = 1280)]
        width: u32,
        #[arg(long, default_value_t = 720)]
        height: u32,
    },
    /// Check the detection service
    Probe,
    /// Write the default config file
    InitConfig {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.json_logs);

    let mut config = load_config(args.config.as_deref()).context("failed to load config")?;
    if let Some(server) = &args.server {
        config.detection.base_url = server.clone();
    }

    match args.command {
        Command::Still { image } => scan_still(config, image).await,
        Command::Replay { dir, interval_ms } => {
            let camera = ReplayCamera::from_dir(&dir, Duration::from_millis(interval_ms))?;
            scan_feed(config, Box::new(camera)).await
        }
        #[cfg(feature = "v4l_camera")]
        Command::Camera {
            device,
            width,
            height,
        } => {
            let camera = label_scanner_lib::V4lCamera::new(device, width, height);
            scan_feed(config, Box::new(camera)).await
        }
        Command::Probe => {
            let server = probe(&config).await.context("detection service probe failed")?;
            println!("{}", serde_json::to_string_pretty(&server)?);
            Ok(())
        }
        Command::InitConfig { force } => {
            let path = init_config(args.config.as_deref(), force)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

async fn scan_still(config: ScannerConfig, path: PathBuf) -> Result<()> {
    let image = image::open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .to_rgb8();

    // Still images never start the camera
    let camera = ReplayCamera::from_frames(Vec::new(), Duration::from_millis(100));
    let (scanner, ready) = initialize(config, Box::new(camera)).await?;
    info!(detector_online = ready.detector_online, recognizer = %ready.recognizer, "Scanner ready");

    match scanner.process_still_image(&image).await? {
        Some(label) => {
            println!("{}", serde_json::to_string_pretty(&label)?);
            Ok(())
        }
        None => bail!("no label text found in {}", path.display()),
    }
}

async fn scan_feed(config: ScannerConfig, camera: Box<dyn CameraDevice>) -> Result<()> {
    let (scanner, ready) = initialize(config, camera).await?;
    if !ready.detector_online {
        warn!("Detection service offline, scanning in degraded mode");
    }

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let callback: EventCallback = Arc::new(move |event: ScanEvent| {
        let _ = events_tx.send(event);
    });
    scanner.start_scanning(callback).await?;

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ScanEvent::LabelScanned(label)) => {
                    println!("{}", serde_json::to_string_pretty(&label)?);
                    break Ok(());
                }
                Some(ScanEvent::SourceFailed { reason }) => {
                    break Err(anyhow::anyhow!("camera failed: {}", reason));
                }
                Some(ScanEvent::ExtractionFailed { reason }) => info!(reason = %reason, "No readable text, still scanning"),
                Some(ScanEvent::DegradedMode { active }) => warn!(active, "Degraded mode changed"),
                Some(ScanEvent::StateChanged { .. }) => {}
                None => break Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    scanner.stop_scanning().await;
    outcome
}
