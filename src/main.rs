//! frameflow: live camera frames through conversion, orientation fix-up and
//! an analysis engine, with drop-on-busy backpressure

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use frameflow::capture::{CaptureSession, SharedSettings, SyntheticCamera};
use frameflow::display::Presenter;
use frameflow::pipeline::{engine, AnalysisWorker, Pipeline};
use frameflow::{bench, Config, SourceKind};

/// Real-time camera frame pipeline
#[derive(Parser)]
#[command(name = "frameflow", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live pipeline (default)
    Run {
        /// Stop once this many frames have been processed
        #[arg(long)]
        frames: Option<u64>,
        /// Stop after this many seconds
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Time the configured engine on a still image
    Bench {
        image: PathBuf,
        #[arg(short = 'n', long, default_value_t = 10)]
        iterations: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frameflow=info".into()),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    let command = cli.command.unwrap_or(Command::Run {
        frames: None,
        seconds: None,
    });
    match command {
        Command::Run { frames, seconds } => run(config, frames, seconds).await,
        Command::Bench { image, iterations } => {
            let frame = bench::load_image(&image)?;
            let mut engine = engine::from_config(&config.engine);
            let report = bench::run(engine.as_mut(), &frame, iterations)?;
            println!(
                "{}x{}: first call {:.3} ms, mean {:.3} ms over {} iterations",
                report.width,
                report.height,
                frameflow::utils::as_millis_f64(report.first_call),
                frameflow::utils::as_millis_f64(report.mean),
                report.iterations
            );
            Ok(())
        }
    }
}

async fn run(config: Config, frames: Option<u64>, seconds: Option<u64>) -> Result<()> {
    info!("frameflow launching...");

    let (presenter, presenter_handle) = Presenter::spawn(&config.display)?;
    let presenter = Arc::new(presenter);

    let pipeline = Pipeline::new(
        engine::from_config(&config.engine),
        presenter.clone(),
        config.pipeline.on_engine_error,
    );
    pipeline.initialize()?;

    let worker = Arc::new(AnalysisWorker::spawn(config.pipeline.worker_core)?);
    pipeline.attach(worker.clone());

    let settings = SharedSettings::from_config(&config.capture);
    // Camera failures stay at the boundary: log and run without a session
    let session = match start_camera(&config, settings.clone(), &worker) {
        Ok(session) => Some(session),
        Err(e) => {
            error!("Camera session did not start: {}", e);
            None
        }
    };

    if session.is_some() {
        wait_for_stop(&settings, &pipeline, frames, seconds).await;
    }

    let timeout = Duration::from_millis(config.pipeline.teardown_timeout_ms);
    let teardown = tokio::task::block_in_place(|| pipeline.teardown(timeout));

    if let Some(session) = session {
        let report = session.stop();
        if report.produced != report.released {
            warn!(
                "{} frames were never released",
                report.produced - report.released
            );
        }
    }

    let worker = Arc::into_inner(worker).ok_or_else(|| eyre!("analysis worker still shared"))?;
    let busy_drops = worker.dropped();
    worker.shutdown();

    let counters = pipeline.counters();
    info!(
        "Processed {} frames, dropped {} at the worker and {} in the analyzer, {} presentations skipped",
        counters.processed,
        busy_drops,
        counters.dropped,
        presenter.dropped()
    );

    drop(pipeline);
    drop(presenter);
    if presenter_handle.join().is_err() {
        warn!("presentation thread panicked");
    }

    teardown?;
    info!("frameflow shutting down");
    Ok(())
}

fn start_camera(
    config: &Config,
    settings: SharedSettings,
    worker: &AnalysisWorker,
) -> frameflow::Result<CaptureSession> {
    match config.capture.source {
        SourceKind::Synthetic => SyntheticCamera::start(&config.capture, settings, worker.sender()),
        #[cfg(feature = "v4l2")]
        SourceKind::V4l2 => {
            frameflow::capture::V4l2Camera::start(&config.capture, settings, worker.sender())
        }
        #[cfg(not(feature = "v4l2"))]
        SourceKind::V4l2 => Err(std::io::Error::other(
            "built without the `v4l2` feature; rebuild with --features v4l2",
        )
        .into()),
    }
}

/// Block until Ctrl-C, `q` on stdin, the optional deadline or the optional
/// frame count. Meanwhile `f` toggles the lens and `r <deg>` sets the display
/// rotation.
async fn wait_for_stop(
    settings: &SharedSettings,
    pipeline: &Pipeline,
    frames: Option<u64>,
    seconds: Option<u64>,
) {
    let deadline = async {
        match seconds {
            Some(s) => tokio::time::sleep(Duration::from_secs(s)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut progress = tokio::time::interval(Duration::from_millis(50));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    info!("Running: 'f' toggles facing, 'r <deg>' sets rotation, 'q' quits");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            _ = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
            _ = progress.tick(), if frames.is_some() => {
                let processed = pipeline.counters().processed;
                if frames.is_some_and(|n| processed >= n) {
                    info!("Processed {} frames", processed);
                    break;
                }
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    let mut words = line.split_whitespace();
                    match (words.next(), words.next()) {
                        (Some("q"), _) => break,
                        (Some("f"), _) => {
                            settings.toggle_facing();
                        }
                        (Some("r"), Some(deg)) => match deg.parse() {
                            Ok(deg) => {
                                settings.set_rotation(deg);
                            }
                            Err(_) => warn!("Not a rotation: {}", deg),
                        },
                        (None, _) => {}
                        _ => warn!("Unknown command: {}", line.trim()),
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }
}
