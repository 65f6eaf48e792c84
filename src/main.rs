//! hikcam demo: pull frames from a simulated camera and report FPS

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hikcam::sdk::sim::{FrameGeometry, SimulatedSdk};
use hikcam::{utils, Camera, Config};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hikcam=debug"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_timer(fmt::time::uptime()));

    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());

    registry.init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    init_tracing();

    info!("hikcam launching...");

    // Load configuration
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    // Stand-in for the vendor SDK: one device plus a grab thread
    let sdk = Arc::new(SimulatedSdk::new());
    sdk.add_device(
        &config.camera.serial,
        FrameGeometry {
            width: config.simulation.width,
            height: config.simulation.height,
            format: config.simulation.pixel_format,
        },
    );
    utils::list_devices(&*sdk)?;
    let _generator = sdk.spawn_generator(&config.camera.serial, config.simulation.fps)?;

    let camera = Camera::new(Arc::clone(&sdk), &config);

    info!("Waiting for camera...");
    utils::wait_for_camera(&camera, &config.camera).await?;
    camera.start()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut poll = tokio::time::interval(Duration::from_millis(10));
    let mut report = tokio::time::interval(Duration::from_secs(1));

    let mut frame_count: u64 = 0;
    let mut last_report_count: u64 = 0;
    let mut last_sequence: u64 = 0;
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = poll.tick() => {
                while let Some(frame) = camera.get_image() {
                    frame_count += 1;
                    last_sequence = frame.sequence();
                }
            }
            _ = report.tick() => {
                let fps = frame_count - last_report_count;
                last_report_count = frame_count;
                let stats = camera.stats();
                info!(
                    fps,
                    last_sequence,
                    connected = camera.is_connected(),
                    overwritten = stats.frames_overwritten,
                    "frames"
                );
            }
        }
    }

    info!("hikcam shutting down");
    if let Err(e) = camera.stop() {
        warn!("Stop failed: {}", e);
    }
    camera.close()?;
    Ok(())
}
