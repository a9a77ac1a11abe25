//! Boundary to the external processing engine

use std::fmt;
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

use crate::capture::frame::FrameViewMut;
use crate::{EngineConfig, EngineKind};

/// Integer status returned by every engine entry point. Zero is success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus(pub i32);

impl EngineStatus {
    pub const OK: EngineStatus = EngineStatus(0);

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque analysis engine.
///
/// The pipeline guarantees the three calls never overlap: `process` only runs
/// between a successful `initialize` and `finalize`, and `finalize` only
/// after the last `process` has returned. The view handed to `process` may be
/// modified in place; its contents afterwards become the frame that is
/// rendered.
pub trait ProcessingEngine: Send {
    fn name(&self) -> &'static str;

    fn initialize(&mut self) -> EngineStatus;

    fn process(&mut self, frame: FrameViewMut<'_>) -> EngineStatus;

    fn finalize(&mut self) -> EngineStatus;
}

/// Accepts every frame untouched
#[derive(Debug, Default)]
pub struct NullEngine;

impl ProcessingEngine for NullEngine {
    fn name(&self) -> &'static str {
        "null"
    }

    fn initialize(&mut self) -> EngineStatus {
        EngineStatus::OK
    }

    fn process(&mut self, _frame: FrameViewMut<'_>) -> EngineStatus {
        EngineStatus::OK
    }

    fn finalize(&mut self) -> EngineStatus {
        EngineStatus::OK
    }
}

/// Stand-in for a real model: burns a fixed time per frame, can invert the
/// image and can fail periodically.
#[derive(Debug)]
pub struct SimulatedEngine {
    latency: Duration,
    invert: bool,
    fail_every: u64,
    frames: u64,
}

/// Status the simulated engine reports for its injected failures
pub const SIMULATED_FAILURE: EngineStatus = EngineStatus(-1);

impl SimulatedEngine {
    pub fn new(latency: Duration, invert: bool, fail_every: u64) -> Self {
        Self {
            latency,
            invert,
            fail_every,
            frames: 0,
        }
    }
}

impl ProcessingEngine for SimulatedEngine {
    fn name(&self) -> &'static str {
        "simulated"
    }

    fn initialize(&mut self) -> EngineStatus {
        info!(
            "Simulated engine: latency {:?}, invert {}, fail every {}",
            self.latency, self.invert, self.fail_every
        );
        self.frames = 0;
        EngineStatus::OK
    }

    fn process(&mut self, mut frame: FrameViewMut<'_>) -> EngineStatus {
        self.frames += 1;
        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        if self.fail_every > 0 && self.frames % self.fail_every == 0 {
            debug!(frame = self.frames, "simulated engine failure");
            return SIMULATED_FAILURE;
        }
        if self.invert {
            for row in frame.rows_mut() {
                row.iter_mut().for_each(|b| *b = 255 - *b);
            }
        }
        EngineStatus::OK
    }

    fn finalize(&mut self) -> EngineStatus {
        info!("Simulated engine processed {} frames", self.frames);
        EngineStatus::OK
    }
}

/// Build the engine selected in configuration
pub fn from_config(config: &EngineConfig) -> Box<dyn ProcessingEngine> {
    match config.kind {
        EngineKind::Null => Box::new(NullEngine),
        EngineKind::Simulated => Box::new(SimulatedEngine::new(
            Duration::from_millis(config.latency_ms),
            config.invert,
            config.fail_every,
        )),
    }
}
