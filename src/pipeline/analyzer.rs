//! Per-frame flow: gate, convert, correct, run the engine, time, hand off

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tracing::{debug, error, warn};

use crate::capture::decoder::ColorConverter;
use crate::capture::frame::RawFrame;
use crate::display::RenderTarget;
use crate::pipeline::engine::ProcessingEngine;
use crate::pipeline::lifecycle::{Lifecycle, PipelineState};
use crate::pipeline::orientation::OrientationCorrector;
use crate::pipeline::stats::{PerformanceTracker, PipelineCounters};
use crate::utils::as_millis_f64;
use crate::EngineErrorPolicy;

/// Capability a frame source delivers frames into
pub trait FrameSink: Send + Sync {
    fn on_frame(&self, frame: RawFrame);
}

/// Tracker state touched only by the frame worker
#[derive(Debug)]
pub(crate) struct Timing {
    pub tracker: PerformanceTracker,
    pub previous: Instant,
}

impl Timing {
    pub fn new() -> Self {
        Self {
            tracker: PerformanceTracker::new(),
            previous: Instant::now(),
        }
    }

    /// Forget all history; the next interval is measured from now
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.previous = Instant::now();
    }
}

/// Everything the analyzer and the lifecycle operations share
pub(crate) struct Shared {
    pub lifecycle: Lifecycle,
    pub engine: Mutex<Box<dyn ProcessingEngine>>,
    pub render: Arc<dyn RenderTarget>,
    pub timing: Mutex<Timing>,
    pub counters: PipelineCounters,
    pub policy: EngineErrorPolicy,
    pub halted: AtomicBool,
}

/// Processes one frame at a time on behalf of the pipeline.
///
/// Owns no camera resources; every frame it receives is released before
/// `on_frame` returns.
pub struct FrameAnalyzer {
    shared: Arc<Shared>,
    converter: ColorConverter,
    corrector: OrientationCorrector,
}

impl FrameAnalyzer {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            converter: ColorConverter::new(),
            corrector: OrientationCorrector::new(),
        }
    }

    fn drop_frame(&self, frame: RawFrame, reason: &'static str) {
        debug!(seq = frame.sequence, reason, "frame dropped");
        self.shared.counters.frame_dropped();
        frame.release();
    }
}

impl FrameSink for FrameAnalyzer {
    fn on_frame(&self, frame: RawFrame) {
        let shared = &*self.shared;

        if !shared.render.is_available() {
            return self.drop_frame(frame, "render surface unavailable");
        }
        if shared.lifecycle.state() != PipelineState::Initialized {
            return self.drop_frame(frame, "pipeline busy or not initialized");
        }
        if shared.halted.load(Ordering::Acquire) {
            return self.drop_frame(frame, "pipeline halted");
        }

        let canonical = match self.converter.convert(&frame) {
            Ok(c) => c,
            Err(e) => {
                warn!(seq = frame.sequence, "conversion failed: {}", e);
                return self.drop_frame(frame, "conversion failed");
            }
        };
        let mut canonical = self.corrector.correct(canonical, frame.rotation, frame.facing);

        // Teardown may have claimed the engine while we were converting
        if !shared.lifecycle.begin_run() {
            return self.drop_frame(frame, "pipeline left Initialized");
        }
        let start = Instant::now();
        let status = {
            let mut engine = shared.engine.lock().unwrap_or_else(PoisonError::into_inner);
            engine.process(canonical.view_mut())
        };
        let end = Instant::now();
        shared.lifecycle.end_run();

        if !status.is_ok() {
            shared.counters.engine_error();
            let keep = match shared.policy {
                EngineErrorPolicy::DropFrame => {
                    warn!(seq = frame.sequence, %status, "engine rejected frame");
                    false
                }
                EngineErrorPolicy::Halt => {
                    error!(seq = frame.sequence, %status, "engine failed, halting pipeline");
                    shared.halted.store(true, Ordering::Release);
                    false
                }
                EngineErrorPolicy::Ignore => {
                    debug!(seq = frame.sequence, %status, "engine status ignored");
                    true
                }
            };
            if !keep {
                return self.drop_frame(frame, "engine error");
            }
        }

        let engine_time = end - start;
        let timing = {
            let mut t = shared.timing.lock().unwrap_or_else(PoisonError::into_inner);
            let interval = end - t.previous;
            t.previous = end;
            metrics::histogram!("frame_interval_ms").record(as_millis_f64(interval));
            t.tracker.record(interval, engine_time)
        };
        metrics::histogram!("engine_time_ms").record(as_millis_f64(engine_time));
        shared.counters.frame_processed();

        shared.render.present(canonical, timing.overlay());
        frame.release();
    }
}
