//! camctl - capture service entry point
//!
//! Drives the capture-transfer core with directory-backed cameras: every file
//! that appears in a device directory is treated as a new capture.
//!
//! ```text
//! camctl watch --device-dir /mnt/cam1 --device-dir /mnt/cam2
//! camctl apply-preset Studio --device-dir /mnt/cam1 --device-dir /mnt/cam2
//! camctl verify-preset Studio --device-dir /mnt/cam1
//! camctl capture-preset Studio --device-dir /mnt/cam1
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use camctl_capture::config::CaptureConfig;
use camctl_capture::device::{DeviceRegistry, FolderCamera};
use camctl_capture::preset::{BatchMode, EventProgress, Preset, PresetBatchApplier};
use camctl_capture::CaptureServiceBuilder;
use camctl_common::config::{default_config_path, write_toml_config, LoggingConfig};
use camctl_common::{CameraEvent, EventBus};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for camctl
#[derive(Parser, Debug)]
#[command(name = "camctl")]
#[command(about = "Camera capture transfer service")]
#[command(version)]
struct Args {
    /// Configuration file
    #[arg(short, long, env = "CAMCTL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transfer new captures until interrupted
    Watch {
        /// Camera directory (repeatable)
        #[arg(long = "device-dir", required = true)]
        device_dirs: Vec<PathBuf>,

        /// Destination folder (overrides environment and config)
        #[arg(long)]
        capture_folder: Option<PathBuf>,

        /// Device poll interval in milliseconds
        #[arg(long, default_value = "500", env = "CAMCTL_POLL_INTERVAL_MS")]
        poll_interval_ms: u64,

        /// Also transfer files already present at start-up
        #[arg(long)]
        include_existing: bool,
    },

    /// Write a saved preset to every connected camera
    ApplyPreset {
        name: String,
        #[arg(long = "device-dir", required = true)]
        device_dirs: Vec<PathBuf>,
    },

    /// Compare every connected camera against a saved preset
    VerifyPreset {
        name: String,
        #[arg(long = "device-dir", required = true)]
        device_dirs: Vec<PathBuf>,
    },

    /// Save a camera's current properties as a preset
    CapturePreset {
        name: String,
        #[arg(long = "device-dir")]
        device_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path().context("Failed to locate config file")?,
    };
    let mut config = CaptureConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    init_tracing(&config.base.logging)?;
    info!("Starting camctl, config {}", config_path.display());

    match args.command {
        Command::Watch {
            device_dirs,
            capture_folder,
            poll_interval_ms,
            include_existing,
        } => {
            config.resolve_capture_folder(capture_folder.as_deref());
            watch(
                &config,
                &device_dirs,
                Duration::from_millis(poll_interval_ms),
                include_existing,
            )
            .await
        }
        Command::ApplyPreset { name, device_dirs } => {
            run_preset_batch(&config, &name, &device_dirs, BatchMode::Set).await
        }
        Command::VerifyPreset { name, device_dirs } => {
            run_preset_batch(&config, &name, &device_dirs, BatchMode::Verify).await
        }
        Command::CapturePreset { name, device_dir } => {
            capture_preset(config, &config_path, &name, &device_dir).await
        }
    }
}

/// RUST_LOG wins over the configured level; a configured file replaces stderr
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .with_context(|| format!("Invalid log level '{}'", logging.level))?;

    let (file_layer, stderr_layer) = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            (Some(layer), None)
        }
        None => (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .init();
    Ok(())
}

fn open_cameras(dirs: &[PathBuf]) -> Result<Vec<Arc<FolderCamera>>> {
    dirs.iter()
        .enumerate()
        .map(|(index, dir)| {
            let id = format!("cam{}", index + 1);
            FolderCamera::open(id, dir)
                .map(Arc::new)
                .with_context(|| format!("Failed to open camera {}", dir.display()))
        })
        .collect()
}

fn register(registry: &DeviceRegistry, cameras: &[Arc<FolderCamera>]) {
    for camera in cameras {
        registry.add(camera.clone());
    }
    registry.sort(true);
}

async fn watch(
    config: &CaptureConfig,
    device_dirs: &[PathBuf],
    poll_interval: Duration,
    include_existing: bool,
) -> Result<()> {
    let cameras = open_cameras(device_dirs)?;
    let service = CaptureServiceBuilder::from_config(config).build();
    register(service.registry(), &cameras);

    let log_task = tokio::spawn(log_events(service.bus().subscribe()));

    if !include_existing {
        for camera in &cameras {
            let skipped = poll(camera).await.len();
            if skipped > 0 {
                info!(device = %camera.root().display(), skipped, "Ignoring files present at start-up");
            }
        }
    }

    let (tx, rx) = mpsc::channel(64);
    let dispatcher = service.dispatcher().clone();
    let dispatch_task = tokio::spawn(async move { dispatcher.run(rx).await });

    info!(
        devices = cameras.len(),
        folder = %config.session.folder.display(),
        "Watching for captures"
    );

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(poll_interval);

    'watch: loop {
        tokio::select! {
            _ = ticker.tick() => {
                for camera in &cameras {
                    for event in poll(camera).await {
                        if tx.send(event).await.is_err() {
                            error!("Capture dispatcher stopped unexpectedly");
                            break 'watch;
                        }
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    drop(tx);
    dispatch_task.await.context("Capture dispatcher failed")?;
    service.shutdown().await;
    log_task.abort();

    info!("camctl stopped");
    Ok(())
}

async fn poll(camera: &Arc<FolderCamera>) -> Vec<camctl_capture::device::CaptureEvent> {
    let camera = Arc::clone(camera);
    let root = camera.root().to_path_buf();
    match tokio::task::spawn_blocking(move || camera.poll_new_captures()).await {
        Ok(Ok(events)) => events,
        Ok(Err(e)) => {
            warn!(device = %root.display(), error = %e, "Polling failed");
            Vec::new()
        }
        Err(e) => {
            error!(device = %root.display(), error = %e, "Polling task failed");
            Vec::new()
        }
    }
}

async fn run_preset_batch(
    config: &CaptureConfig,
    name: &str,
    device_dirs: &[PathBuf],
    mode: BatchMode,
) -> Result<()> {
    let preset = config
        .preset_store()
        .get(name)
        .cloned()
        .with_context(|| format!("No preset named '{}' in config", name))?;

    let registry = Arc::new(DeviceRegistry::new());
    register(&registry, &open_cameras(device_dirs)?);

    let bus = EventBus::new(64);
    let log_task = tokio::spawn(log_events(bus.subscribe()));

    let applier = Arc::new(PresetBatchApplier::new(registry));
    let summary = applier
        .spawn(preset, mode, Arc::new(EventProgress::new(bus.clone(), name)))
        .await
        .context("Preset batch task failed")?;

    // Let the logger drain the final events
    drop(bus);
    if tokio::time::timeout(Duration::from_secs(1), log_task).await.is_err() {
        debug!("Event log still open after batch");
    }

    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        mismatched = summary.mismatched,
        "Preset {} complete",
        name
    );
    Ok(())
}

async fn capture_preset(
    mut config: CaptureConfig,
    config_path: &Path,
    name: &str,
    device_dir: &Path,
) -> Result<()> {
    let camera = open_cameras(&[device_dir.to_path_buf()])?
        .pop()
        .context("No camera opened")?;

    let preset_name = name.to_string();
    let preset = tokio::task::spawn_blocking(move || Preset::capture(preset_name, camera.as_ref()))
        .await
        .context("Capture task failed")?
        .context("Failed to read camera properties")?;

    let mut store = config.preset_store();
    store.add(preset);
    config.presets = store.into_vec();
    write_toml_config(&config, config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    info!("Preset {} saved to {}", name, config_path.display());
    Ok(())
}

/// Log UI-facing events until the bus closes
async fn log_events(mut rx: broadcast::Receiver<CameraEvent>) {
    loop {
        match rx.recv().await {
            Ok(CameraEvent::StatusMessage { text, .. }) => info!("{}", text),
            Ok(event) => match serde_json::to_string(&event) {
                Ok(json) => debug!(event = event.event_type(), "{}", json),
                Err(e) => warn!(error = %e, "Unserializable event"),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
