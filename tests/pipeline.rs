//! Lifecycle, backpressure and end-to-end behaviour of the frame pipeline

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::{
    count, init_test_tracing, tracked_frame, EngineEvent, EventLog, RecordingEngine,
    RecordingTarget,
};
use frameflow::capture::decoder::ColorConverter;
use frameflow::capture::source::synthetic_frame;
use frameflow::pipeline::engine::{EngineStatus, SimulatedEngine};
use frameflow::pipeline::{AnalysisWorker, FrameSink, FrameSource, Pipeline, PipelineState};
use frameflow::{DisplayRotation, Facing, PipelineError};
use frameflow::EngineErrorPolicy;

const TIMEOUT: Duration = Duration::from_secs(5);

fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn pipeline_with(
    engine: RecordingEngine,
    policy: EngineErrorPolicy,
) -> (Pipeline, Arc<RecordingTarget>) {
    let target = Arc::new(RecordingTarget::default());
    let pipeline = Pipeline::new(Box::new(engine), target.clone(), policy);
    (pipeline, target)
}

#[test]
fn frames_before_initialize_are_dropped() {
    let log = new_log();
    let (pipeline, target) = pipeline_with(RecordingEngine::new(log.clone()), Default::default());
    let released = Arc::new(AtomicUsize::new(0));

    pipeline
        .analyzer()
        .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(count(&log, EngineEvent::ProcessStart), 0);
    assert_eq!(target.presented(), 0);
    assert_eq!(pipeline.counters().dropped, 1);
}

#[test]
fn unavailable_surface_drops_without_engine_call() {
    let log = new_log();
    let (pipeline, target) = pipeline_with(RecordingEngine::new(log.clone()), Default::default());
    pipeline.initialize().unwrap();
    target.unavailable.store(true, Ordering::SeqCst);
    let released = Arc::new(AtomicUsize::new(0));

    pipeline
        .analyzer()
        .on_frame(tracked_frame(8, 8, DisplayRotation::Deg0, Facing::Front, &released));

    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(count(&log, EngineEvent::ProcessStart), 0);
    assert_eq!(pipeline.state(), PipelineState::Initialized);
}

#[test]
fn busy_engine_drops_the_next_frame() {
    init_test_tracing();
    let log = new_log();
    let (entered_tx, entered_rx) = flume::bounded(1);
    let (gate_tx, gate_rx) = flume::bounded(1);
    let mut engine = RecordingEngine::new(log.clone());
    engine.entered = Some(entered_tx);
    engine.gate = Some(gate_rx);

    let (pipeline, target) = pipeline_with(engine, Default::default());
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let analyzer = pipeline.analyzer();
    let first = tracked_frame(16, 8, DisplayRotation::Deg90, Facing::Back, &released);
    let in_flight = thread::spawn(move || analyzer.on_frame(first));

    entered_rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(pipeline.state(), PipelineState::Running);

    pipeline
        .analyzer()
        .on_frame(tracked_frame(16, 8, DisplayRotation::Deg90, Facing::Back, &released));
    assert_eq!(released.load(Ordering::SeqCst), 1, "second frame released at once");

    gate_tx.send(()).unwrap();
    in_flight.join().unwrap();

    assert_eq!(count(&log, EngineEvent::ProcessStart), 1);
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(target.presented(), 1);
    assert_eq!(pipeline.state(), PipelineState::Initialized);
    let counters = pipeline.counters();
    assert_eq!((counters.processed, counters.dropped), (1, 1));
}

#[test]
fn teardown_times_out_then_succeeds_once_idle() {
    let log = new_log();
    let (entered_tx, entered_rx) = flume::bounded(1);
    let (gate_tx, gate_rx) = flume::bounded(1);
    let mut engine = RecordingEngine::new(log.clone());
    engine.entered = Some(entered_tx);
    engine.gate = Some(gate_rx);

    let (pipeline, _target) = pipeline_with(engine, Default::default());
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    let analyzer = pipeline.analyzer();
    let frame = tracked_frame(8, 8, DisplayRotation::Deg0, Facing::Back, &released);
    let in_flight = thread::spawn(move || analyzer.on_frame(frame));
    entered_rx.recv_timeout(TIMEOUT).unwrap();

    let err = pipeline.teardown(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, PipelineError::DrainTimeout(_)));
    assert_eq!(count(&log, EngineEvent::Finalize), 0);

    gate_tx.send(()).unwrap();
    pipeline.teardown(TIMEOUT).unwrap();
    in_flight.join().unwrap();

    assert_eq!(count(&log, EngineEvent::Finalize), 1);
    assert_eq!(pipeline.state(), PipelineState::NotInitialized);
    assert_eq!(released.load(Ordering::SeqCst), 1);
}

#[test]
fn finalize_never_overlaps_process() {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    for round in 0..1000 {
        let log = new_log();
        let mut engine = RecordingEngine::new(log.clone());
        engine.latency = Duration::from_micros(rng.gen_range(0..60));
        let (pipeline, _target) = pipeline_with(engine, Default::default());
        pipeline.initialize().unwrap();

        let released = Arc::new(AtomicUsize::new(0));
        let frames = rng.gen_range(1..5);
        let pauses: Vec<u64> = (0..frames).map(|_| rng.gen_range(0..40)).collect();
        let teardown_delay = Duration::from_micros(rng.gen_range(0..120));

        let analyzer = pipeline.analyzer();
        let r = released.clone();
        let producer = thread::spawn(move || {
            for pause in pauses {
                thread::sleep(Duration::from_micros(pause));
                analyzer.on_frame(tracked_frame(4, 4, DisplayRotation::Deg0, Facing::Back, &r));
            }
        });

        thread::sleep(teardown_delay);
        pipeline.teardown(TIMEOUT).unwrap();
        producer.join().unwrap();

        let events = log.lock().unwrap().clone();
        let finalize_at = events
            .iter()
            .position(|e| *e == EngineEvent::Finalize)
            .unwrap_or_else(|| panic!("round {round}: no finalize in {events:?}"));
        assert_eq!(finalize_at, events.len() - 1, "round {round}: {events:?}");
        assert_eq!(
            count(&log, EngineEvent::ProcessStart),
            count(&log, EngineEvent::ProcessEnd),
            "round {round}: {events:?}"
        );
        for pair in events[1..finalize_at].chunks(2) {
            assert_eq!(
                pair,
                [EngineEvent::ProcessStart, EngineEvent::ProcessEnd],
                "round {round}: {events:?}"
            );
        }
        assert_eq!(released.load(Ordering::SeqCst), frames, "round {round}");
    }
}

#[test]
fn full_hd_at_rotation_90_passes_through_unrotated() {
    init_test_tracing();
    let log = new_log();
    let (pipeline, target) = pipeline_with(RecordingEngine::new(log.clone()), Default::default());
    pipeline.initialize().unwrap();
    assert_eq!(pipeline.state(), PipelineState::Initialized);

    let released = Arc::new(AtomicUsize::new(0));
    pipeline
        .analyzer()
        .on_frame(tracked_frame(1920, 1080, DisplayRotation::Deg90, Facing::Back, &released));

    let expected = ColorConverter::new()
        .convert(&synthetic_frame(
            1920,
            1080,
            0,
            DisplayRotation::Deg90,
            Facing::Back,
            true,
        ))
        .unwrap();
    {
        let frames = target.frames.lock().unwrap();
        assert_eq!(frames.len(), 1);
        let (frame, text) = &frames[0];
        assert_eq!((frame.width, frame.height), (1920, 1080));
        assert!(*frame == expected, "frame must not be rotated or mirrored");
        assert!(text.fps.ends_with("[FPS]"));
        assert!(text.process_time.ends_with("[msec]"));
    }
    assert_eq!(released.load(Ordering::SeqCst), 1);

    pipeline.teardown(TIMEOUT).unwrap();
    assert_eq!(count(&log, EngineEvent::Finalize), 1);

    pipeline
        .analyzer()
        .on_frame(tracked_frame(1920, 1080, DisplayRotation::Deg90, Facing::Back, &released));
    assert_eq!(count(&log, EngineEvent::ProcessStart), 1);
    assert_eq!(count(&log, EngineEvent::Finalize), 1);
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            EngineEvent::Initialize,
            EngineEvent::ProcessStart,
            EngineEvent::ProcessEnd,
            EngineEvent::Finalize
        ]
    );
}

#[test]
fn rotation_zero_output_is_transposed() {
    let (pipeline, target) =
        pipeline_with(RecordingEngine::new(new_log()), Default::default());
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    pipeline
        .analyzer()
        .on_frame(tracked_frame(32, 16, DisplayRotation::Deg0, Facing::Front, &released));

    let frames = target.frames.lock().unwrap();
    assert_eq!((frames[0].0.width, frames[0].0.height), (16, 32));
}

#[test]
fn engine_output_is_what_gets_rendered() {
    let mut engine = RecordingEngine::new(new_log());
    engine.paint = Some([1, 2, 3]);
    let (pipeline, target) = pipeline_with(engine, Default::default());
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    pipeline
        .analyzer()
        .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));

    assert_eq!(target.frames.lock().unwrap()[0].0.pixel(0, 0), [1, 2, 3]);
}

#[test]
fn failed_frames_are_skipped_under_drop_policy() {
    let log = new_log();
    let mut engine = RecordingEngine::new(log.clone());
    engine.process_status = EngineStatus(7);
    let (pipeline, target) = pipeline_with(engine, EngineErrorPolicy::DropFrame);
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        pipeline
            .analyzer()
            .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));
    }

    assert_eq!(count(&log, EngineEvent::ProcessStart), 3);
    assert_eq!(target.presented(), 0);
    assert_eq!(pipeline.counters().engine_errors, 3);
    assert!(!pipeline.is_halted());
    assert_eq!(released.load(Ordering::SeqCst), 3);
}

#[test]
fn halt_policy_stops_after_first_failure() {
    let target = Arc::new(RecordingTarget::default());
    let pipeline = Pipeline::new(
        Box::new(SimulatedEngine::new(Duration::ZERO, false, 1)),
        target.clone(),
        EngineErrorPolicy::Halt,
    );
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        pipeline
            .analyzer()
            .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));
    }

    assert!(pipeline.is_halted());
    let counters = pipeline.counters();
    assert_eq!(counters.engine_errors, 1);
    assert_eq!(counters.dropped, 3);
    assert_eq!(released.load(Ordering::SeqCst), 3);

    pipeline.teardown(TIMEOUT).unwrap();
}

#[test]
fn engine_init_failure_leaves_pipeline_down() {
    let log = new_log();
    let mut engine = RecordingEngine::new(log.clone());
    engine.init_status = EngineStatus(3);
    let (pipeline, _target) = pipeline_with(engine, Default::default());

    assert!(matches!(pipeline.initialize(), Err(PipelineError::EngineInit(3))));
    assert_eq!(pipeline.state(), PipelineState::NotInitialized);
    assert!(matches!(
        pipeline.teardown(TIMEOUT),
        Err(PipelineError::WrongState { .. })
    ));
    assert_eq!(count(&log, EngineEvent::Finalize), 0);
}

#[test]
fn reinitialize_after_teardown() {
    let log = new_log();
    let (pipeline, target) = pipeline_with(RecordingEngine::new(log.clone()), Default::default());
    let released = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        pipeline.initialize().unwrap();
        pipeline
            .analyzer()
            .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));
        pipeline.teardown(TIMEOUT).unwrap();
    }

    assert_eq!(count(&log, EngineEvent::Initialize), 2);
    assert_eq!(count(&log, EngineEvent::Finalize), 2);
    assert_eq!(target.presented(), 2);
    assert!(matches!(
        pipeline.initialize().and_then(|_| pipeline.initialize()),
        Err(PipelineError::WrongState { .. })
    ));
}

#[test]
fn concurrent_initialize_runs_engine_init_once() {
    let log = new_log();
    let mut engine = RecordingEngine::new(log.clone());
    engine.init_latency = Duration::from_millis(100);
    let (pipeline, _target) = pipeline_with(engine, Default::default());

    thread::scope(|s| {
        let first = s.spawn(|| pipeline.initialize());
        thread::sleep(Duration::from_millis(20));
        assert!(matches!(
            pipeline.initialize(),
            Err(PipelineError::WrongState {
                actual: PipelineState::Initializing,
                ..
            })
        ));
        first.join().unwrap().unwrap();
    });

    assert_eq!(count(&log, EngineEvent::Initialize), 1);
    assert_eq!(pipeline.state(), PipelineState::Initialized);
}

#[test]
fn initialize_waits_out_a_running_finalize() {
    let log = new_log();
    let (entered_tx, entered_rx) = flume::bounded(1);
    let (gate_tx, gate_rx) = flume::bounded(1);
    let mut engine = RecordingEngine::new(log.clone());
    engine.finalize_entered = Some(entered_tx);
    engine.finalize_gate = Some(gate_rx);
    let (pipeline, target) = pipeline_with(engine, Default::default());
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        let teardown = s.spawn(|| pipeline.teardown(TIMEOUT));
        entered_rx.recv_timeout(TIMEOUT).unwrap();

        assert_eq!(pipeline.state(), PipelineState::Finalizing);
        assert!(matches!(
            pipeline.initialize(),
            Err(PipelineError::WrongState {
                actual: PipelineState::Finalizing,
                ..
            })
        ));
        pipeline
            .analyzer()
            .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));

        gate_tx.send(()).unwrap();
        teardown.join().unwrap().unwrap();
    });

    assert_eq!(pipeline.state(), PipelineState::NotInitialized);
    pipeline.initialize().unwrap();
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            EngineEvent::Initialize,
            EngineEvent::Finalize,
            EngineEvent::Initialize
        ]
    );
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(target.presented(), 0);
}

#[test]
fn ignore_policy_presents_failed_frames() {
    let log = new_log();
    let mut engine = RecordingEngine::new(log.clone());
    engine.process_status = EngineStatus(7);
    let (pipeline, target) = pipeline_with(engine, EngineErrorPolicy::Ignore);
    pipeline.initialize().unwrap();
    let released = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        pipeline
            .analyzer()
            .on_frame(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, &released));
    }

    let counters = pipeline.counters();
    assert_eq!(counters.engine_errors, 2);
    assert_eq!(counters.processed, 2);
    assert_eq!(counters.dropped, 0);
    assert_eq!(target.presented(), 2);
    assert!(!pipeline.is_halted());
    assert_eq!(released.load(Ordering::SeqCst), 2);
}

#[test]
fn teardown_deregisters_from_the_worker() {
    init_test_tracing();
    let log = new_log();
    let (pipeline, target) = pipeline_with(RecordingEngine::new(log.clone()), Default::default());
    pipeline.initialize().unwrap();

    let worker = Arc::new(AnalysisWorker::spawn(None).unwrap());
    pipeline.attach(worker.clone());
    let sender = worker.sender();
    let released = Arc::new(AtomicUsize::new(0));

    let deliver = |released: &Arc<AtomicUsize>| {
        let deadline = std::time::Instant::now() + TIMEOUT;
        while !sender.try_deliver(tracked_frame(8, 8, DisplayRotation::Deg90, Facing::Back, released)) {
            assert!(std::time::Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
    };

    deliver(&released);
    let wait_until = std::time::Instant::now() + TIMEOUT;
    while target.presented() == 0 {
        assert!(std::time::Instant::now() < wait_until, "frame never presented");
        thread::sleep(Duration::from_millis(1));
    }

    pipeline.teardown(TIMEOUT).unwrap();
    let after_teardown = Arc::new(AtomicUsize::new(0));
    deliver(&after_teardown);
    drop(sender);

    let worker = Arc::into_inner(worker).expect("pipeline let go of the worker");
    worker.shutdown();

    assert_eq!(count(&log, EngineEvent::ProcessStart), 1);
    assert_eq!(after_teardown.load(Ordering::SeqCst), 1);
    assert_eq!(target.presented(), 1);
}

#[test]
fn deregistered_source_stops_receiving() {
    struct Probe(AtomicUsize);
    impl FrameSink for Probe {
        fn on_frame(&self, frame: frameflow::RawFrame) {
            self.0.fetch_add(1, Ordering::SeqCst);
            frame.release();
        }
    }

    let worker = AnalysisWorker::spawn(None).unwrap();
    let probe = Arc::new(Probe(AtomicUsize::new(0)));
    worker.register(probe.clone());
    worker.deregister();

    let released = Arc::new(AtomicUsize::new(0));
    let sender = worker.sender();
    let deadline = std::time::Instant::now() + TIMEOUT;
    while !sender.try_deliver(tracked_frame(4, 4, DisplayRotation::Deg0, Facing::Back, &released)) {
        assert!(std::time::Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }
    drop(sender);
    worker.shutdown();

    assert_eq!(probe.0.load(Ordering::SeqCst), 0);
}
