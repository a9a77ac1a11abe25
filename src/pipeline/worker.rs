//! Dedicated analysis thread with a capacity-one hand-off.
//!
//! Producers offer frames through a rendezvous channel: a frame is accepted
//! only while the worker is parked waiting for one. Anything offered while a
//! frame is being analyzed is dropped on the spot, which releases it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use arc_swap::ArcSwapOption;
use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, info, warn};

use crate::capture::frame::RawFrame;
use crate::error::Result;
use crate::pipeline::{FrameSink, FrameSource};
use crate::utils;

struct Registration {
    sink: Arc<dyn FrameSink>,
}

/// Producer side of the worker, handed to camera sources
#[derive(Clone)]
pub struct FrameSender {
    tx: Sender<RawFrame>,
    dropped: Arc<AtomicU64>,
}

impl FrameSender {
    /// Offer a frame. Returns false when it was dropped instead.
    pub fn try_deliver(&self, frame: RawFrame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(frame)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped").increment(1);
                debug!(seq = frame.sequence, "worker busy, frame dropped");
                false
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// True once the worker has shut down
    pub fn is_closed(&self) -> bool {
        self.tx.is_disconnected()
    }
}

/// Single worker thread that delivers frames serially to the registered sink
pub struct AnalysisWorker {
    sender: FrameSender,
    sink: Arc<ArcSwapOption<Registration>>,
    handle: JoinHandle<u64>,
}

impl AnalysisWorker {
    /// Spawn the worker, optionally pinned to `core`
    pub fn spawn(core: Option<usize>) -> Result<Self> {
        let (tx, rx) = flume::bounded::<RawFrame>(0);
        let sink: Arc<ArcSwapOption<Registration>> = Arc::new(ArcSwapOption::empty());

        let worker_sink = sink.clone();
        let handle = thread::Builder::new()
            .name("frame-analyzer".into())
            .spawn(move || {
                if let Some(core) = core {
                    utils::pin_current_thread(core);
                }
                run(rx, &worker_sink)
            })?;

        Ok(Self {
            sender: FrameSender {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            sink,
            handle,
        })
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    /// Frames refused because the worker was busy
    pub fn dropped(&self) -> u64 {
        self.sender.dropped.load(Ordering::Relaxed)
    }

    /// Close the hand-off and join the thread.
    ///
    /// The thread exits once every [`FrameSender`] is gone, so sources must be
    /// stopped first. Returns the number of frames the worker delivered.
    pub fn shutdown(self) -> u64 {
        let AnalysisWorker { sender, handle, .. } = self;
        drop(sender);
        match handle.join() {
            Ok(delivered) => delivered,
            Err(_) => {
                warn!("analysis worker panicked");
                0
            }
        }
    }
}

impl FrameSource for AnalysisWorker {
    fn register(&self, sink: Arc<dyn FrameSink>) {
        self.sink.store(Some(Arc::new(Registration { sink })));
        debug!("analyzer registered");
    }

    fn deregister(&self) {
        self.sink.store(None);
        debug!("analyzer deregistered");
    }
}

fn run(rx: Receiver<RawFrame>, sink: &ArcSwapOption<Registration>) -> u64 {
    info!("Analysis worker started");
    let mut delivered = 0;
    for frame in rx.iter() {
        match sink.load_full() {
            Some(registration) => {
                delivered += 1;
                registration.sink.on_frame(frame);
            }
            None => frame.release(),
        }
    }
    info!("Analysis worker stopped after {} frames", delivered);
    delivered
}
