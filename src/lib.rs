pub mod bench;
pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use capture::frame::{CanonicalFrame, DisplayRotation, Facing, RawFrame};
pub use error::{PipelineError, Result};
pub use pipeline::{Pipeline, PipelineState};

/// Prefix for environment overrides, e.g. `FRAMEFLOW__ENGINE__LATENCY_MS=40`
pub const ENV_PREFIX: &str = "FRAMEFLOW";

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub engine: EngineConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synthetic,
    V4l2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub facing: Facing,
    /// Display rotation in degrees; anything but 90 or 270 means 0
    pub rotation: u32,
    /// Deliver chroma as interleaved VU with pixel stride 2 (synthetic source)
    pub semi_planar: bool,
}

/// What to do when the engine returns a non-zero status for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineErrorPolicy {
    /// Skip the frame, keep going
    #[default]
    DropFrame,
    /// Stop processing; every later frame is dropped until reinitialized
    Halt,
    /// Count the failure but time and present the frame anyway
    Ignore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub teardown_timeout_ms: u64,
    pub on_engine_error: EngineErrorPolicy,
    /// Pin the analysis worker to this CPU core
    pub worker_core: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Null,
    Simulated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub latency_ms: u64,
    pub invert: bool,
    /// Every n-th frame fails; 0 never fails
    pub fail_every: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub queue_depth: usize,
    pub snapshot_dir: Option<PathBuf>,
    /// Write every n-th presented frame to `snapshot_dir`
    pub snapshot_every: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            device: "/dev/video0".into(),
            width: 640,
            height: 480,
            fps: 30,
            facing: Facing::Back,
            rotation: 0,
            semi_planar: true,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            teardown_timeout_ms: 2000,
            on_engine_error: EngineErrorPolicy::DropFrame,
            worker_core: None,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Simulated,
            latency_ms: 20,
            invert: false,
            fail_every: 0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            queue_depth: 4,
            snapshot_dir: None,
            snapshot_every: 0,
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `FRAMEFLOW__*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.capture;
        if c.width == 0 || c.height == 0 || c.width % 2 != 0 || c.height % 2 != 0 {
            return Err(PipelineError::InvalidGeometry {
                width: c.width,
                height: c.height,
            });
        }
        Ok(())
    }
}
