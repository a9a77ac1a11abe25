//! Capture sessions and the synthetic test-pattern camera

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::capture::frame::{DisplayRotation, Facing, Plane, RawFrame};
use crate::error::Result;
use crate::pipeline::worker::FrameSender;
use crate::CaptureConfig;

/// Lens and rotation the next frames are tagged with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CameraSettings {
    pub facing: Facing,
    pub rotation: DisplayRotation,
}

/// Settings shared between the capture thread and whoever re-binds the camera
#[derive(Debug, Clone)]
pub struct SharedSettings(Arc<ArcSwap<CameraSettings>>);

impl SharedSettings {
    pub fn new(settings: CameraSettings) -> Self {
        Self(Arc::new(ArcSwap::from_pointee(settings)))
    }

    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(CameraSettings {
            facing: config.facing,
            rotation: DisplayRotation::from_degrees(config.rotation),
        })
    }

    pub fn current(&self) -> CameraSettings {
        **self.0.load()
    }

    /// Switch lenses. Returns the new facing.
    pub fn toggle_facing(&self) -> Facing {
        let previous = self.0.rcu(|s| CameraSettings {
            facing: s.facing.toggled(),
            ..**s
        });
        let facing = previous.facing.toggled();
        info!("Camera re-bound, facing {:?}", facing);
        facing
    }

    pub fn set_rotation(&self, degrees: u32) -> DisplayRotation {
        let rotation = DisplayRotation::from_degrees(degrees);
        self.0.rcu(|s| CameraSettings { rotation, ..**s });
        info!("Display rotation set to {} degrees", rotation.degrees());
        rotation
    }
}

/// Bookkeeping shared by all frames of one session
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub produced: AtomicU64,
    pub released: AtomicU64,
}

impl SessionCounters {
    /// Tag `frame` so its release is counted against this session
    pub fn track(self: &Arc<Self>, frame: RawFrame) -> RawFrame {
        self.produced.fetch_add(1, Ordering::Relaxed);
        let counters = self.clone();
        frame.with_release(move || {
            counters.released.fetch_add(1, Ordering::Relaxed);
        })
    }
}

/// Summary of a stopped capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureReport {
    pub produced: u64,
    pub released: u64,
}

/// A running capture thread
pub struct CaptureSession {
    stop: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
    handle: JoinHandle<()>,
}

impl CaptureSession {
    /// Spawn `body` on a named capture thread. `body` must return once the
    /// stop flag is raised.
    pub(crate) fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce(Arc<AtomicBool>, Arc<SessionCounters>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(SessionCounters::default());
        let (s, c) = (stop.clone(), counters.clone());
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(s, c))?;
        Ok(Self {
            stop,
            counters,
            handle,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn stop(self) -> CaptureReport {
        self.stop.store(true, Ordering::Release);
        if self.handle.join().is_err() {
            warn!("capture thread panicked");
        }
        let report = CaptureReport {
            produced: self.counters.produced.load(Ordering::Relaxed),
            released: self.counters.released.load(Ordering::Relaxed),
        };
        info!(
            "Capture stopped: {} frames produced, {} released",
            report.produced, report.released
        );
        report
    }
}

/// Camera stand-in producing a moving test pattern
pub struct SyntheticCamera;

impl SyntheticCamera {
    #[instrument(skip_all, fields(width = config.width, height = config.height, fps = config.fps))]
    pub fn start(
        config: &CaptureConfig,
        settings: SharedSettings,
        sender: FrameSender,
    ) -> Result<CaptureSession> {
        let (width, height) = (config.width, config.height);
        let semi_planar = config.semi_planar;
        let interval = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
        info!("Starting synthetic camera");

        CaptureSession::spawn("camera", move |stop, counters| {
            let mut sequence = 0u64;
            let mut next = Instant::now();
            while !stop.load(Ordering::Acquire) && !sender.is_closed() {
                let current = settings.current();
                let frame = synthetic_frame(
                    width,
                    height,
                    sequence,
                    current.rotation,
                    current.facing,
                    semi_planar,
                );
                sender.try_deliver(counters.track(frame));
                sequence += 1;

                next += interval;
                let now = Instant::now();
                if next > now {
                    thread::sleep(next - now);
                } else {
                    next = now;
                }
            }
        })
    }
}

/// Build one test-pattern frame: a diagonal luma ramp drifting with
/// `sequence`, horizontal/vertical chroma ramps, and a bright block in the
/// top-left corner so orientation is visible.
///
/// With `semi_planar` the chroma planes alias one interleaved VU buffer with
/// a pixel stride of 2, the way mobile camera stacks deliver them.
pub fn synthetic_frame(
    width: u32,
    height: u32,
    sequence: u64,
    rotation: DisplayRotation,
    facing: Facing,
    semi_planar: bool,
) -> RawFrame {
    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w / 2, h / 2);
    let drift = (sequence * 4) as usize;
    let marker = (w.min(h) / 8).max(1);

    let mut luma = vec![0u8; w * h];
    for (y, row) in luma.chunks_mut(w).enumerate() {
        for (x, px) in row.iter_mut().enumerate() {
            *px = if x < marker && y < marker {
                235
            } else {
                (16 + (x + y + drift) % 220) as u8
            };
        }
    }

    let u_at = |x: usize| (64 + x * 128 / cw.max(1)) as u8;
    let v_at = |y: usize| (64 + y * 128 / ch.max(1)) as u8;

    let planes = if semi_planar {
        let mut vu = Vec::with_capacity(cw * ch * 2);
        for y in 0..ch {
            for x in 0..cw {
                vu.push(v_at(y));
                vu.push(u_at(x));
            }
        }
        let vu = Bytes::from(vu);
        let len = vu.len();
        [
            Plane::new(Bytes::from(luma), w, 1),
            Plane::new(vu.slice(1..len), w, 2),
            Plane::new(vu.slice(0..len.saturating_sub(1)), w, 2),
        ]
    } else {
        let u: Vec<u8> = (0..ch).flat_map(|_| (0..cw).map(u_at)).collect();
        let v: Vec<u8> = (0..ch).flat_map(|y| (0..cw).map(move |_| v_at(y))).collect();
        [
            Plane::new(Bytes::from(luma), w, 1),
            Plane::new(Bytes::from(u), cw, 1),
            Plane::new(Bytes::from(v), cw, 1),
        ]
    };

    RawFrame::new(planes, width, height, rotation, facing, sequence)
}
