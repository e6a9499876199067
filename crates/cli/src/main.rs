mod metrics;
mod project;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cantor_core::runner::encode_pcm_s16le;
use cantor_core::testing::MockRunner;
use cantor_core::{
    load_config, validate_config, Config, PhraseStatus, PriorityClass, ProcessRunner,
    ProjectSession, RunnerProgress, SynthesisRunner, Track,
};

use project::ProjectFile;

/// Buffer size for runner progress updates
const PROGRESS_BUFFER_SIZE: usize = 256;

/// Command-line arguments for cantor
#[derive(Parser, Debug)]
#[command(name = "cantor")]
#[command(about = "Estimate and render every track of a singing synthesis project")]
#[command(version)]
struct Args {
    /// Project file (JSON)
    project: PathBuf,

    /// Directory for the rendered .pcm files
    #[arg(default_value = ".")]
    output_dir: PathBuf,

    /// Configuration file
    #[arg(short, long, default_value = "cantor.toml", env = "CANTOR_CONFIG")]
    config: PathBuf,

    /// Use the built-in mock runner instead of the engine executables
    #[arg(long)]
    mock: bool,

    /// Write Prometheus metrics to this file when done
    #[arg(long)]
    metrics: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    // A missing config file falls back to defaults; a broken one is fatal.
    let config = if args.config.exists() {
        info!("Loading configuration from {:?}", args.config);
        load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        info!("No configuration at {:?}, using defaults", args.config);
        Config::default()
    };
    validate_config(&config).context("Configuration validation failed")?;

    let tracks = ProjectFile::load(&args.project)?.into_tracks();
    info!(tracks = tracks.len(), "Project loaded from {:?}", args.project);

    let runner: Arc<dyn SynthesisRunner> = if args.mock {
        Arc::new(MockRunner::new())
    } else {
        Arc::new(ProcessRunner::new(config.runner.clone()))
    };
    runner
        .validate()
        .await
        .with_context(|| format!("Runner {} is not usable", runner.name()))?;
    info!("Using runner: {}", runner.name());

    let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_BUFFER_SIZE);
    let progress_task = tokio::spawn(log_progress(progress_rx));

    let session = ProjectSession::with_progress(config.session.clone(), runner, progress_tx);
    session.begin();
    for track in &tracks {
        session
            .enqueue_estimate_track(track, PriorityClass::Sequence)
            .await;
    }

    // Retries of a failed whole-track item are queued after its phrases
    // already read as failed, so wait on the queues rather than on statuses.
    let interrupted = tokio::select! {
        _ = session.wait_idle() => false,
        _ = shutdown_signal() => true,
    };

    session.end().await;
    // The session owned the last progress sender.
    drop(session);
    let _ = progress_task.await;

    if interrupted {
        warn!("Interrupted; writing what has been rendered so far");
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("Failed to create {:?}", args.output_dir))?;
    let mut failed = 0;
    for track in &tracks {
        failed += write_track(track, &args.output_dir).await?;
    }

    if let Some(path) = &args.metrics {
        std::fs::write(path, metrics::encode_metrics()?)
            .with_context(|| format!("Failed to write metrics to {:?}", path))?;
    }

    if failed > 0 {
        bail!("{} phrase(s) failed", failed);
    }
    if interrupted {
        bail!("interrupted before all phrases completed");
    }
    info!("All tracks rendered");
    Ok(())
}

/// Writes a track's waveform; returns how many of its phrases failed.
async fn write_track(track: &Track, output_dir: &Path) -> Result<usize> {
    let statuses = track.statuses().await;
    let failed = statuses.iter().filter(|s| s.is_error()).count();
    let complete = statuses
        .iter()
        .filter(|&&s| s == PhraseStatus::Complete)
        .count();

    let path = output_dir.join(format!("{}.pcm", track.name()));
    let waveform = track.waveform().await;
    std::fs::write(&path, encode_pcm_s16le(&waveform))
        .with_context(|| format!("Failed to write {:?}", path))?;

    info!(
        track = %track.name(),
        complete,
        failed,
        samples = waveform.len(),
        sample_rate = track.engine().sample_rate(),
        "Wrote {:?}",
        path
    );
    Ok(failed)
}

async fn log_progress(mut progress: mpsc::Receiver<RunnerProgress>) {
    while let Some(update) = progress.recv().await {
        match update.percent {
            Some(percent) => debug!(
                job = %update.job_id,
                stage = update.stage.as_str(),
                "{:.0}%",
                percent
            ),
            None => debug!(job = %update.job_id, stage = update.stage.as_str(), "{}", update.line),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
