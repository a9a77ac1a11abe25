//! Frame analysis pipeline and its lifecycle

pub mod analyzer;
pub mod engine;
pub mod lifecycle;
pub mod orientation;
pub mod stats;
pub mod worker;

pub use analyzer::{FrameAnalyzer, FrameSink};
pub use engine::{EngineStatus, ProcessingEngine};
pub use lifecycle::PipelineState;
pub use worker::AnalysisWorker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::display::RenderTarget;
use crate::error::{PipelineError, Result};
use crate::EngineErrorPolicy;
use analyzer::{Shared, Timing};
use lifecycle::Lifecycle;
use stats::{CountersSnapshot, PipelineCounters};

/// Something frames can be registered against
pub trait FrameSource: Send + Sync {
    /// Start delivering frames to `sink`
    fn register(&self, sink: Arc<dyn FrameSink>);

    /// Stop delivering. Frames already handed over still complete.
    fn deregister(&self);
}

/// Owns the engine and drives it through
/// `initialize -> on_frame* -> teardown`.
pub struct Pipeline {
    shared: Arc<Shared>,
    analyzer: Arc<FrameAnalyzer>,
    source: Mutex<Option<Arc<dyn FrameSource>>>,
}

impl Pipeline {
    pub fn new(
        engine: Box<dyn ProcessingEngine>,
        render: Arc<dyn RenderTarget>,
        policy: EngineErrorPolicy,
    ) -> Self {
        let shared = Arc::new(Shared {
            lifecycle: Lifecycle::new(),
            engine: Mutex::new(engine),
            render,
            timing: Mutex::new(Timing::new()),
            counters: PipelineCounters::default(),
            policy,
            halted: AtomicBool::new(false),
        });
        let analyzer = Arc::new(FrameAnalyzer::new(shared.clone()));
        Self {
            shared,
            analyzer,
            source: Mutex::new(None),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.shared.lifecycle.state()
    }

    pub fn counters(&self) -> CountersSnapshot {
        self.shared.counters.snapshot()
    }

    /// True after an engine failure under [`EngineErrorPolicy::Halt`]
    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::Acquire)
    }

    /// The frame entry point, for sources that are wired by hand
    pub fn analyzer(&self) -> Arc<FrameAnalyzer> {
        self.analyzer.clone()
    }

    /// Bring the engine up. Frames are dropped until this succeeds.
    ///
    /// Concurrent callers race for the transition; only the winner touches
    /// the engine, the others get `WrongState`.
    #[instrument(skip(self))]
    pub fn initialize(&self) -> Result<()> {
        self.shared.lifecycle.begin_initialize()?;

        let status = {
            let mut engine = self.lock_engine();
            info!("Initializing engine '{}'", engine.name());
            engine.initialize()
        };
        if !status.is_ok() {
            self.shared.lifecycle.abort_initialize();
            return Err(PipelineError::EngineInit(status.0));
        }

        self.shared
            .timing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reset();
        self.shared.halted.store(false, Ordering::Release);
        self.shared.lifecycle.mark_initialized()?;
        info!("Pipeline initialized");
        Ok(())
    }

    /// Register the analyzer with `source`; teardown deregisters it
    pub fn attach(&self, source: Arc<dyn FrameSource>) {
        let mut current = self.source.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = current.take() {
            previous.deregister();
        }
        source.register(self.analyzer.clone());
        *current = Some(source);
    }

    /// Stop taking frames, wait up to `timeout` for the frame in flight,
    /// then finalize the engine.
    ///
    /// On timeout the engine is left alone and teardown can be retried.
    #[instrument(skip(self))]
    pub fn teardown(&self, timeout: Duration) -> Result<()> {
        if let Some(source) = self
            .source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            source.deregister();
        }

        self.shared.lifecycle.drain(timeout)?;

        let status = self.lock_engine().finalize();
        self.shared.lifecycle.mark_finalized();
        if !status.is_ok() {
            warn!(%status, "engine finalize reported failure");
        }

        let counters = self.counters();
        info!(
            "Pipeline torn down: {} processed, {} dropped, {} engine errors",
            counters.processed, counters.dropped, counters.engine_errors
        );
        Ok(())
    }

    fn lock_engine(&self) -> std::sync::MutexGuard<'_, Box<dyn ProcessingEngine>> {
        self.shared
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
