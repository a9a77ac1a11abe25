//! Pipeline state machine and the drain protocol used by teardown

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};

/// Where the pipeline is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    NotInitialized = 0,
    /// Engine ready, no frame in flight
    Initialized = 1,
    /// Engine call in flight
    Running = 2,
    /// Engine `initialize` in progress
    Initializing = 3,
    /// Drained; engine `finalize` in progress
    Finalizing = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => PipelineState::Initialized,
            2 => PipelineState::Running,
            3 => PipelineState::Initializing,
            4 => PipelineState::Finalizing,
            _ => PipelineState::NotInitialized,
        }
    }
}

/// Atomic holder of [`PipelineState`] plus the idle signal teardown waits on
#[derive(Debug)]
pub struct Lifecycle {
    state: CachePadded<AtomicU8>,
    idle_lock: Mutex<()>,
    idle: Condvar,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: CachePadded::new(AtomicU8::new(PipelineState::NotInitialized as u8)),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
        }
    }

    pub fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: PipelineState, to: PipelineState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| PipelineError::WrongState {
                expected: from,
                actual: PipelineState::from_u8(actual),
            })
    }

    /// Claim `NotInitialized -> Initializing` before the engine is touched
    pub fn begin_initialize(&self) -> Result<()> {
        self.transition(PipelineState::NotInitialized, PipelineState::Initializing)
    }

    /// `Initializing -> Initialized`, once the engine is ready
    pub fn mark_initialized(&self) -> Result<()> {
        self.transition(PipelineState::Initializing, PipelineState::Initialized)
    }

    /// Engine refused to start: `Initializing -> NotInitialized`
    pub fn abort_initialize(&self) {
        if let Err(e) = self.transition(PipelineState::Initializing, PipelineState::NotInitialized) {
            warn!("abort_initialize outside of initialization: {}", e);
        }
    }

    /// `Finalizing -> NotInitialized`, once the engine has been finalized
    pub fn mark_finalized(&self) {
        if let Err(e) = self.transition(PipelineState::Finalizing, PipelineState::NotInitialized) {
            warn!("mark_finalized outside of teardown: {}", e);
        }
    }

    /// Claim the engine for one call. Fails when the pipeline is not idle.
    pub fn begin_run(&self) -> bool {
        self.transition(PipelineState::Initialized, PipelineState::Running)
            .is_ok()
    }

    /// Hand the engine back and wake anyone draining
    pub fn end_run(&self) {
        if let Err(e) = self.transition(PipelineState::Running, PipelineState::Initialized) {
            warn!("end_run outside of a run: {}", e);
        }
        let _guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.idle.notify_all();
    }

    /// Wait for the in-flight call to finish, then move to `Finalizing`.
    ///
    /// Once this returns `Ok`, neither a run nor an initialize can begin, so
    /// the caller owns the engine until [`mark_finalized`](Self::mark_finalized).
    /// On timeout the state is left untouched.
    pub fn drain(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match self.transition(PipelineState::Initialized, PipelineState::Finalizing) {
                Ok(()) => return Ok(()),
                Err(PipelineError::WrongState {
                    actual: PipelineState::Running,
                    ..
                }) => {}
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PipelineError::DrainTimeout(timeout));
            }
            debug!("waiting for in-flight frame before teardown");
            let (g, _) = self
                .idle
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            guard = g;
        }
    }
}
