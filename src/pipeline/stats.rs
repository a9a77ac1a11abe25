//! Frame rate and engine latency bookkeeping

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam::utils::CachePadded;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Latest value of a metric next to its running mean
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingSample {
    pub instant: f64,
    pub average: f64,
}

/// Result of recording one completed frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTiming {
    /// Frames per second
    pub fps: TimingSample,
    /// Engine time in nanoseconds
    pub engine_ns: TimingSample,
    pub count: u64,
}

impl FrameTiming {
    pub fn fps_text(&self) -> String {
        format!("{:4.1} ({:4.1}) [FPS]", self.fps.average, self.fps.instant)
    }

    pub fn engine_text(&self) -> String {
        format!(
            "{} ({}) [msec]",
            (self.engine_ns.average / NANOS_PER_MILLI) as u64,
            (self.engine_ns.instant / NANOS_PER_MILLI) as u64
        )
    }

    pub fn overlay(&self) -> OverlayText {
        OverlayText {
            fps: self.fps_text(),
            process_time: self.engine_text(),
        }
    }
}

/// The two strings shown next to the rendered frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OverlayText {
    pub fps: String,
    pub process_time: String,
}

impl fmt::Display for OverlayText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}  {}", self.fps, self.process_time)
    }
}

/// Running arithmetic means of frame rate and engine time.
///
/// Every frame carries equal weight, so the averages settle slowly after
/// startup.
#[derive(Debug, Default)]
pub struct PerformanceTracker {
    count: u64,
    avg_fps: f64,
    avg_engine_ns: f64,
}

impl PerformanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn record(&mut self, frame_interval: Duration, engine_duration: Duration) -> FrameTiming {
        // A zero interval would divide by zero; one nanosecond is the floor
        let interval_ns = frame_interval.as_nanos().max(1) as f64;
        let engine_ns = engine_duration.as_nanos() as f64;
        let fps = NANOS_PER_SEC / interval_ns;

        self.count += 1;
        let n = self.count as f64;
        self.avg_fps = (self.avg_fps * (n - 1.0) + fps) / n;
        self.avg_engine_ns = (self.avg_engine_ns * (n - 1.0) + engine_ns) / n;

        FrameTiming {
            fps: TimingSample {
                instant: fps,
                average: self.avg_fps,
            },
            engine_ns: TimingSample {
                instant: engine_ns,
                average: self.avg_engine_ns,
            },
            count: self.count,
        }
    }
}

/// Lock-free pipeline counters, shared between worker and observers
#[derive(Debug, Default)]
pub struct PipelineCounters {
    inner: CachePadded<Counters>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    dropped: AtomicU64,
    engine_errors: AtomicU64,
}

/// Point-in-time copy of [`PipelineCounters`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CountersSnapshot {
    pub processed: u64,
    pub dropped: u64,
    pub engine_errors: u64,
}

impl PipelineCounters {
    pub fn frame_processed(&self) {
        self.inner.processed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_processed").increment(1);
    }

    pub fn frame_dropped(&self) {
        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_dropped").increment(1);
    }

    pub fn engine_error(&self) {
        self.inner.engine_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("engine_errors").increment(1);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            processed: self.inner.processed.load(Ordering::Relaxed),
            dropped: self.inner.dropped.load(Ordering::Relaxed),
            engine_errors: self.inner.engine_errors.load(Ordering::Relaxed),
        }
    }
}
