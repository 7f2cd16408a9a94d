//! Offload camera frames to a remote inference server

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use tracing::{error, info};

use offload::offload::TcpOffloadClient;
use offload::{capture, utils, Config, Pipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "offload=debug".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Offload Launching...");

    // Load configuration
    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("OFFLOAD_CONFIG"))
        .map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref())?;

    // Auto-detect capture device if needed
    if config.capture.device.path.is_empty() {
        let device = utils::auto_detect_device().await?;
        config.capture.format = device.format;
        config.capture.device = device;
    }
    info!("Using capture device: {:?}", config.capture.device);
    offload::CONFIG.store(Arc::new(config.clone()));

    let transport = Arc::new(TcpOffloadClient::new(
        config.offload.server_addr.clone(),
        Duration::from_millis(config.offload.connect_timeout_ms),
    ));
    let pipeline = Arc::new(Pipeline::builder(config.clone(), transport).build()?);

    let mut capture = capture::V4l2Capture::new(config.capture)?;
    capture.start_stream()?;

    // The camera callback runs on its own thread, like a driver callback would
    let running = Arc::new(AtomicBool::new(true));
    let capture_handle = {
        let pipeline = pipeline.clone();
        let running = running.clone();
        std::thread::Builder::new()
            .name("capture".into())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    match capture.capture_frame() {
                        Ok(frame) => {
                            pipeline.on_image_available(Some(frame));
                        }
                        Err(e) => {
                            error!("Capture error: {}", e);
                            std::thread::sleep(Duration::from_millis(10));
                        }
                    }
                }
            })?
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    running.store(false, Ordering::Relaxed);

    tokio::task::spawn_blocking(move || capture_handle.join())
        .await?
        .map_err(|_| eyre!("Capture thread panicked"))?;

    let stats = pipeline.stats();
    info!(
        admitted = stats.frames_admitted,
        rejected = stats.frames_rejected,
        released = stats.frames_released,
        offloaded = stats.offload_success,
        failed = stats.offload_failure,
        "Offload shutting down"
    );
    Ok(())
}
