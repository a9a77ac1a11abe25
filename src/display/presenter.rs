//! Presentation thread: receives processed frames in order, shows the
//! overlay text and writes periodic PNG snapshots.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::capture::frame::CanonicalFrame;
use crate::display::RenderTarget;
use crate::error::Result;
use crate::pipeline::stats::OverlayText;
use crate::DisplayConfig;

struct Presentation {
    frame: CanonicalFrame,
    text: OverlayText,
}

/// [`RenderTarget`] backed by a dedicated presentation thread
pub struct Presenter {
    tx: Sender<Presentation>,
    dropped: Arc<AtomicU64>,
}

/// What the presentation thread saw before it stopped
#[derive(Debug, Clone, Default)]
pub struct PresenterReport {
    pub presented: u64,
    pub snapshots: u64,
    pub last_text: Option<OverlayText>,
}

impl Presenter {
    /// Spawn the presentation thread.
    ///
    /// The thread exits once every `Presenter` handle is dropped.
    pub fn spawn(config: &DisplayConfig) -> Result<(Self, JoinHandle<PresenterReport>)> {
        let (tx, rx) = flume::bounded(config.queue_depth.max(1));
        if let Some(dir) = &config.snapshot_dir {
            std::fs::create_dir_all(dir)?;
        }

        let snapshot_dir = config.snapshot_dir.clone();
        let snapshot_every = config.snapshot_every;
        let handle = thread::Builder::new()
            .name("presenter".into())
            .spawn(move || present_loop(rx, snapshot_dir, snapshot_every))?;

        info!("Presenter started (queue depth {})", config.queue_depth.max(1));
        Ok((
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            handle,
        ))
    }

    /// Presentations discarded because the presentation thread lagged
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl RenderTarget for Presenter {
    fn is_available(&self) -> bool {
        !self.tx.is_disconnected()
    }

    fn present(&self, frame: CanonicalFrame, text: OverlayText) {
        match self.tx.try_send(Presentation { frame, text }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("presentations_dropped").increment(1);
                debug!("presentation queue full, frame not shown");
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("presentation thread is gone");
            }
        }
    }
}

fn present_loop(
    rx: Receiver<Presentation>,
    snapshot_dir: Option<PathBuf>,
    snapshot_every: u64,
) -> PresenterReport {
    let mut report = PresenterReport::default();

    for Presentation { frame, text } in rx.iter() {
        report.presented += 1;
        debug!(
            width = frame.width,
            height = frame.height,
            "{}",
            text
        );
        if report.presented % 30 == 1 {
            info!("{}", text);
        }

        if let Some(dir) = &snapshot_dir {
            if snapshot_every > 0 && report.presented % snapshot_every == 0 {
                match save_snapshot(dir, report.presented, &frame) {
                    Ok(path) => {
                        report.snapshots += 1;
                        debug!("snapshot written to {}", path.display());
                    }
                    Err(e) => error!("Failed to write snapshot: {}", e),
                }
            }
        }

        report.last_text = Some(text);
    }

    info!("Presenter stopped after {} frames", report.presented);
    report
}

fn save_snapshot(dir: &Path, index: u64, frame: &CanonicalFrame) -> Result<PathBuf> {
    let path = dir.join(format!("frame_{index:06}.png"));
    frame.to_rgb_image().save(&path)?;
    Ok(path)
}
