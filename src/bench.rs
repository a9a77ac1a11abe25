//! Offline engine timing over a still image

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, instrument};

use crate::capture::frame::CanonicalFrame;
use crate::error::{PipelineError, Result};
use crate::pipeline::engine::ProcessingEngine;
use crate::utils::as_millis_f64;

/// Outcome of [`run`]
#[derive(Debug, Clone, Copy)]
pub struct BenchReport {
    pub width: u32,
    pub height: u32,
    pub first_call: Duration,
    pub iterations: u32,
    pub mean: Duration,
}

pub fn load_image(path: &Path) -> Result<CanonicalFrame> {
    let image = image::open(path)?.into_rgb8();
    Ok(CanonicalFrame::from_rgb_image(image))
}

/// Initialize the engine, process `frame` once as a warm-up, then time
/// `iterations` more calls on fresh copies and finalize.
#[instrument(skip(engine, frame), fields(engine_name = engine.name()))]
pub fn run(
    engine: &mut dyn ProcessingEngine,
    frame: &CanonicalFrame,
    iterations: u32,
) -> Result<BenchReport> {
    let status = engine.initialize();
    if !status.is_ok() {
        return Err(PipelineError::EngineInit(status.0));
    }

    let result = timed_calls(engine, frame, iterations);
    let finalized = engine.finalize();
    if !finalized.is_ok() {
        tracing::warn!(%finalized, "engine finalize reported failure");
    }
    let (first_call, total) = result?;

    let mean = if iterations == 0 {
        Duration::ZERO
    } else {
        total / iterations
    };
    info!(
        "Engine time = {:.3} [msec] over {} iterations",
        as_millis_f64(mean),
        iterations
    );

    Ok(BenchReport {
        width: frame.width,
        height: frame.height,
        first_call,
        iterations,
        mean,
    })
}

fn timed_calls(
    engine: &mut dyn ProcessingEngine,
    frame: &CanonicalFrame,
    iterations: u32,
) -> Result<(Duration, Duration)> {
    let mut warm = frame.clone();
    let start = Instant::now();
    let status = engine.process(warm.view_mut());
    let first_call = start.elapsed();
    if !status.is_ok() {
        return Err(PipelineError::EngineProcess(status.0));
    }

    let mut total = Duration::ZERO;
    for _ in 0..iterations {
        let mut copy = frame.clone();
        let start = Instant::now();
        let status = engine.process(copy.view_mut());
        total += start.elapsed();
        if !status.is_ok() {
            return Err(PipelineError::EngineProcess(status.0));
        }
    }
    Ok((first_call, total))
}
