pub mod camera;
pub mod capture;
pub mod error;
pub mod pipeline;
pub mod sdk;
pub mod utils;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use camera::{Camera, CameraStats, LifecycleState};
pub use capture::{Frame, PixelFormat};
pub use error::{CameraError, SdkError, StatusCode};
pub use pipeline::OverflowPolicy;

/// System configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub buffer: BufferConfig,
    pub watchdog: WatchdogConfig,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub serial: String,
    /// Feature file imported right after open
    pub feature_file: Option<PathBuf>,
    /// Fail the open when the feature import fails
    pub require_feature_import: bool,
    pub open_retry_ms: u64,
    /// Zero retries forever
    pub open_attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub poll_interval_ms: u64,
    /// Reconnect attempts per outage before the watchdog only reports
    pub max_reconnect_attempts: u32,
    pub reconnect_backoff_ms: u64,
    /// Reopen interval once the attempts above are used up; zero only reports
    pub slow_retry_ms: u64,
}

/// Synthetic device used by the demo binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            serial: "00F02724098".into(),
            feature_file: None,
            require_feature_import: false,
            open_retry_ms: 1_000,
            open_attempts: 0,
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            capacity: 4,
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_reconnect_attempts: 3,
            reconnect_backoff_ms: 250,
            slow_retry_ms: 5_000,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 640,
            height: 480,
            pixel_format: PixelFormat::Bgr8,
        }
    }
}

impl WatchdogConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn slow_retry(&self) -> Option<Duration> {
        (self.slow_retry_ms > 0).then(|| Duration::from_millis(self.slow_retry_ms))
    }
}

impl Config {
    /// Layer an optional TOML file and `HIKCAM__SECTION__KEY` environment
    /// variables over the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix("HIKCAM").separator("__"))
            .build()?
            .try_deserialize()
    }
}
