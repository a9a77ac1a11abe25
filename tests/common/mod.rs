//! Test doubles shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frameflow::capture::frame::FrameViewMut;
use frameflow::capture::source::synthetic_frame;
use frameflow::display::RenderTarget;
use frameflow::pipeline::engine::{EngineStatus, ProcessingEngine};
use frameflow::pipeline::stats::OverlayText;
use frameflow::{CanonicalFrame, DisplayRotation, Facing, RawFrame};

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frameflow=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    Initialize,
    ProcessStart,
    ProcessEnd,
    Finalize,
}

pub type EventLog = Arc<Mutex<Vec<EngineEvent>>>;

/// Engine that records every call and can be held inside `process`
pub struct RecordingEngine {
    pub log: EventLog,
    pub init_status: EngineStatus,
    pub process_status: EngineStatus,
    pub latency: Duration,
    /// Slept inside `initialize`
    pub init_latency: Duration,
    /// Signalled on entry to `process`
    pub entered: Option<flume::Sender<()>>,
    /// `process` waits for a message here before returning
    pub gate: Option<flume::Receiver<()>>,
    /// Written into the top-left pixel
    pub paint: Option<[u8; 3]>,
    /// Signalled on entry to `finalize`
    pub finalize_entered: Option<flume::Sender<()>>,
    /// `finalize` waits for a message here before returning
    pub finalize_gate: Option<flume::Receiver<()>>,
}

impl RecordingEngine {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            init_status: EngineStatus::OK,
            process_status: EngineStatus::OK,
            latency: Duration::ZERO,
            init_latency: Duration::ZERO,
            entered: None,
            gate: None,
            paint: None,
            finalize_entered: None,
            finalize_gate: None,
        }
    }

    fn push(&self, event: EngineEvent) {
        self.log.lock().unwrap().push(event);
    }
}

impl ProcessingEngine for RecordingEngine {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn initialize(&mut self) -> EngineStatus {
        self.push(EngineEvent::Initialize);
        if !self.init_latency.is_zero() {
            std::thread::sleep(self.init_latency);
        }
        self.init_status
    }

    fn process(&mut self, mut frame: FrameViewMut<'_>) -> EngineStatus {
        self.push(EngineEvent::ProcessStart);
        if let Some(tx) = &self.entered {
            let _ = tx.send(());
        }
        if let Some(rx) = &self.gate {
            let _ = rx.recv();
        }
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        if let Some(rgb) = self.paint {
            frame.data[..3].copy_from_slice(&rgb);
        }
        self.push(EngineEvent::ProcessEnd);
        self.process_status
    }

    fn finalize(&mut self) -> EngineStatus {
        self.push(EngineEvent::Finalize);
        if let Some(tx) = &self.finalize_entered {
            let _ = tx.send(());
        }
        if let Some(rx) = &self.finalize_gate {
            let _ = rx.recv();
        }
        EngineStatus::OK
    }
}

pub fn count(log: &EventLog, event: EngineEvent) -> usize {
    log.lock().unwrap().iter().filter(|e| **e == event).count()
}

/// Render target that keeps everything it is given
#[derive(Default)]
pub struct RecordingTarget {
    pub unavailable: AtomicBool,
    pub frames: Mutex<Vec<(CanonicalFrame, OverlayText)>>,
}

impl RecordingTarget {
    pub fn presented(&self) -> usize {
        self.frames.lock().unwrap().len()
    }
}

impl RenderTarget for RecordingTarget {
    fn is_available(&self) -> bool {
        !self.unavailable.load(Ordering::SeqCst)
    }

    fn present(&self, frame: CanonicalFrame, text: OverlayText) {
        self.frames.lock().unwrap().push((frame, text));
    }
}

/// Synthetic frame whose release bumps `released`
pub fn tracked_frame(
    width: u32,
    height: u32,
    rotation: DisplayRotation,
    facing: Facing,
    released: &Arc<AtomicUsize>,
) -> RawFrame {
    let released = released.clone();
    synthetic_frame(width, height, 0, rotation, facing, true).with_release(move || {
        released.fetch_add(1, Ordering::SeqCst);
    })
}
