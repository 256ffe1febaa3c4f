pub mod capture;
pub mod device;
pub mod error;
pub mod hw;
pub mod output;
pub mod utils;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use capture::{BufferStatus, CompletedBuffer, DmaAddr, FrameBuffer};
pub use device::VinDevice;
pub use error::VinError;
pub use hw::LineId;
pub use output::{OutputEngine, OutputState};

/// Global configuration that can be atomically swapped at runtime
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub format: FormatConfig,
    pub sim: SimConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Frames the pipeline may discard after scratch buffers come up
    pub frame_skip: u32,
    /// Initial capacity of the pending and ready queues
    pub queue_depth: usize,
}

/// Initial negotiated sink format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub line: LineId,
    pub fps: u32,
    pub buffer_count: u32,
    pub frames: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
}

/// Minimum frames to drop after stream start
pub const FRAME_DROP_MIN: u32 = 4;

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            frame_skip: FRAME_DROP_MIN + 30,
            queue_depth: 8,
        }
    }
}

impl Default for FormatConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            line: LineId::Wr,
            fps: 30,
            buffer_count: 4,
            frames: 120,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "vinline=info".into(),
        }
    }
}

impl Config {
    /// Defaults, overlaid by an optional TOML file, overlaid by
    /// `VINLINE__SECTION__KEY` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder
            .add_source(config::Environment::with_prefix("VINLINE").separator("__"))
            .build()?
            .try_deserialize()
    }
}
