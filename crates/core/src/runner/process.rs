//! Runner that shells out to the engine executables.
//!
//! Every invocation gets its own directory under the work dir. Inputs are
//! written there (an HTK-style phoneme label, raw little-endian `f64` feature
//! files), the executable is started with those paths, its stderr is scanned
//! for `NN%` progress, and the outputs are read back once it exits.

use async_trait::async_trait;
use regex_lite::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::config::RunnerConfig;
use super::error::RunnerError;
use super::traits::SynthesisRunner;
use super::types::{EstimationRequest, RenderRequest, RunnerProgress, RunnerStage};
use crate::model::{AcousticFeatures, EngineVersion, TimedPhoneme};

/// Number of trailing stderr lines kept for error reports.
const STDERR_TAIL_LINES: usize = 20;

/// HTK label time unit: 100 ns.
const LABEL_UNITS_PER_MS: u64 = 10_000;

/// How a child process run ended.
enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
    TimedOut,
}

/// Process-backed [`SynthesisRunner`].
pub struct ProcessRunner {
    config: RunnerConfig,
}

impl ProcessRunner {
    /// Creates a new process runner with the given configuration.
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.config.work_dir.join(job_id)
    }

    /// Renders phonemes as an HTK label relative to `origin_ms`.
    fn build_label(phonemes: &[TimedPhoneme], origin_ms: u64) -> String {
        phonemes
            .iter()
            .map(|p| {
                format!(
                    "{} {} {}\n",
                    p.begin_ms.saturating_sub(origin_ms) * LABEL_UNITS_PER_MS,
                    p.end_ms.saturating_sub(origin_ms) * LABEL_UNITS_PER_MS,
                    p.label
                )
            })
            .collect()
    }

    fn encode_f64(values: impl IntoIterator<Item = f64>) -> Vec<u8> {
        values.into_iter().flat_map(f64::to_le_bytes).collect()
    }

    fn decode_f64(bytes: &[u8], what: &str) -> Result<Vec<f64>, RunnerError> {
        if bytes.len() % 8 != 0 {
            return Err(RunnerError::invalid_output(format!(
                "{} has {} bytes, not a multiple of 8",
                what,
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect())
    }

    /// Splits a flat matrix into `frames` rows of `width` values.
    fn to_rows(flat: Vec<f64>, width: usize, frames: usize, what: &str) -> Result<Vec<Vec<f64>>, RunnerError> {
        if width == 0 || flat.len() != width * frames {
            return Err(RunnerError::invalid_output(format!(
                "{} has {} values, expected {} frames x {}",
                what,
                flat.len(),
                frames,
                width
            )));
        }
        Ok(flat.chunks_exact(width).map(<[f64]>::to_vec).collect())
    }

    /// Reads the three feature files written by the estimator.
    async fn read_features(
        engine: EngineVersion,
        f0_path: &Path,
        mgc_path: &Path,
        bap_path: &Path,
    ) -> Result<AcousticFeatures, RunnerError> {
        let f0 = Self::decode_f64(&tokio::fs::read(f0_path).await?, "f0")?;
        let frames = f0.len();
        let mgc = Self::decode_f64(&tokio::fs::read(mgc_path).await?, "mgc")?;
        let bap = Self::decode_f64(&tokio::fs::read(bap_path).await?, "bap")?;

        Ok(AcousticFeatures {
            f0,
            spectral_envelope: Self::to_rows(mgc, engine.spectral_dims(), frames, "mgc")?,
            aperiodicity: Self::to_rows(bap, engine.aperiodic_dims(), frames, "bap")?,
        })
    }

    async fn write_features(
        features: &AcousticFeatures,
        f0_path: &Path,
        mgc_path: &Path,
        bap_path: &Path,
    ) -> Result<(), RunnerError> {
        tokio::fs::write(f0_path, Self::encode_f64(features.f0.iter().copied())).await?;
        tokio::fs::write(
            mgc_path,
            Self::encode_f64(features.spectral_envelope.iter().flatten().copied()),
        )
        .await?;
        tokio::fs::write(
            bap_path,
            Self::encode_f64(features.aperiodicity.iter().flatten().copied()),
        )
        .await?;
        Ok(())
    }

    /// Extracts a trailing `NN%` / `NN.N %` figure from an output line.
    fn parse_percent(re: Option<&Regex>, line: &str) -> Option<f32> {
        let caps = re?.captures_iter(line).last()?;
        caps.get(1)?
            .as_str()
            .parse::<f32>()
            .ok()
            .map(|p| p.clamp(0.0, 100.0))
    }

    /// Runs one executable to completion, honouring cancellation and timeout.
    async fn run_process(
        &self,
        program: &Path,
        args: &[String],
        job_id: &str,
        stage: RunnerStage,
        cancel: &CancellationToken,
        progress_tx: Option<&mpsc::Sender<RunnerProgress>>,
    ) -> Result<(), RunnerError> {
        if cancel.is_cancelled() {
            return Err(RunnerError::Cancelled);
        }

        debug!(program = %program.display(), ?args, job_id, "Starting external process");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    RunnerError::ExecutableNotFound {
                        path: program.to_path_buf(),
                    }
                } else {
                    RunnerError::Io(e)
                }
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| RunnerError::Io(std::io::Error::other("stderr not captured")))?;
        let mut reader = BufReader::new(stderr).lines();
        let percent_regex = Regex::new(r"(\d+(?:\.\d+)?)\s*%").ok();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        let outcome = {
            let work = async {
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Some(tx) = progress_tx {
                        let progress = RunnerProgress {
                            job_id: job_id.to_string(),
                            stage,
                            percent: Self::parse_percent(percent_regex.as_ref(), &line),
                            line: line.clone(),
                        };
                        // Non-blocking send
                        let _ = tx.try_send(progress);
                    }
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                child.wait().await
            };
            let deadline = async {
                match self.config.timeout_secs {
                    Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                status = work => Outcome::Exited(status),
                _ = cancel.cancelled() => Outcome::Cancelled,
                _ = deadline => Outcome::TimedOut,
            }
        };

        match outcome {
            Outcome::Exited(status) => {
                let status = status?;
                if !status.success() {
                    let stderr = Vec::from(tail).join("\n");
                    return Err(RunnerError::process_failed(status.code(), stderr));
                }
                Ok(())
            }
            Outcome::Cancelled => {
                let _ = child.kill().await;
                debug!(job_id, "External process killed after cancellation");
                Err(RunnerError::Cancelled)
            }
            Outcome::TimedOut => {
                let _ = child.kill().await;
                Err(RunnerError::Timeout {
                    timeout_secs: self.config.timeout_secs.unwrap_or_default(),
                })
            }
        }
    }

    async fn cleanup(&self, job_dir: &Path) {
        if self.config.keep_work_files {
            return;
        }
        if let Err(e) = tokio::fs::remove_dir_all(job_dir).await {
            warn!("Failed to remove work dir {:?}: {}", job_dir, e);
        }
    }

    async fn run_estimation(
        &self,
        request: &EstimationRequest,
        job_dir: &Path,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<RunnerProgress>>,
    ) -> Result<AcousticFeatures, RunnerError> {
        let commands = self.config.commands(request.engine);
        let label_path = job_dir.join("input.lab");
        let f0_path = job_dir.join("out.f0");
        let mgc_path = job_dir.join("out.mgc");
        let bap_path = job_dir.join("out.bap");

        tokio::fs::write(&label_path, Self::build_label(&request.phonemes, request.begin_ms)).await?;

        let mut args = vec![
            label_path.to_string_lossy().to_string(),
            f0_path.to_string_lossy().to_string(),
            mgc_path.to_string_lossy().to_string(),
            bap_path.to_string_lossy().to_string(),
            commands.model_dir.to_string_lossy().to_string(),
            "-n".to_string(),
            self.config.threads.to_string(),
            "-q".to_string(),
            request.quality.as_str().to_string(),
        ];
        if let Some(guide) = &request.guide {
            let guide_path = job_dir.join("guide.f0");
            tokio::fs::write(&guide_path, Self::encode_f64(guide.f0.iter().copied())).await?;
            args.extend(["-g".to_string(), guide_path.to_string_lossy().to_string()]);
        }
        args.extend(commands.extra_args.iter().cloned());

        self.run_process(
            &commands.estimator,
            &args,
            &request.job_id,
            RunnerStage::Estimation,
            cancel,
            progress,
        )
        .await?;

        Self::read_features(request.engine, &f0_path, &mgc_path, &bap_path).await
    }

    async fn run_render(
        &self,
        request: &RenderRequest,
        job_dir: &Path,
        cancel: &CancellationToken,
        progress: Option<&mpsc::Sender<RunnerProgress>>,
    ) -> Result<Vec<u8>, RunnerError> {
        if !request.features.is_consistent_with(request.engine) {
            return Err(RunnerError::InvalidRequest {
                reason: format!("features do not match engine {}", request.engine),
            });
        }

        let commands = self.config.commands(request.engine);
        let f0_path = job_dir.join("in.f0");
        let mgc_path = job_dir.join("in.mgc");
        let bap_path = job_dir.join("in.bap");
        let raw_path = job_dir.join("out.raw");

        Self::write_features(&request.features, &f0_path, &mgc_path, &bap_path).await?;

        let mut args = vec![
            f0_path.to_string_lossy().to_string(),
            mgc_path.to_string_lossy().to_string(),
            bap_path.to_string_lossy().to_string(),
            raw_path.to_string_lossy().to_string(),
            "-s".to_string(),
            request.engine.sample_rate().to_string(),
            "-f".to_string(),
            request.engine.frame_period_ms().to_string(),
            "-n".to_string(),
            self.config.threads.to_string(),
            "-q".to_string(),
            request.quality.as_str().to_string(),
        ];
        args.extend(commands.extra_args.iter().cloned());

        self.run_process(
            &commands.renderer,
            &args,
            &request.job_id,
            RunnerStage::Render,
            cancel,
            progress,
        )
        .await?;

        Ok(tokio::fs::read(&raw_path).await?)
    }
}

#[async_trait]
impl SynthesisRunner for ProcessRunner {
    fn name(&self) -> &str {
        "process"
    }

    async fn estimate(
        &self,
        request: EstimationRequest,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Result<AcousticFeatures, RunnerError> {
        let job_dir = self.job_dir(&request.job_id);
        tokio::fs::create_dir_all(&job_dir).await?;
        let result = self
            .run_estimation(&request, &job_dir, &cancel, progress.as_ref())
            .await;
        self.cleanup(&job_dir).await;
        result
    }

    async fn render(
        &self,
        request: RenderRequest,
        cancel: CancellationToken,
        progress: Option<mpsc::Sender<RunnerProgress>>,
    ) -> Result<Vec<u8>, RunnerError> {
        let job_dir = self.job_dir(&request.job_id);
        tokio::fs::create_dir_all(&job_dir).await?;
        let result = self
            .run_render(&request, &job_dir, &cancel, progress.as_ref())
            .await;
        self.cleanup(&job_dir).await;
        result
    }

    async fn validate(&self) -> Result<(), RunnerError> {
        for engine in [EngineVersion::V1, EngineVersion::V2] {
            let commands = self.config.commands(engine);
            for program in [&commands.estimator, &commands.renderer] {
                // Bare names are resolved through PATH at spawn time.
                if program.components().count() > 1 && !program.exists() {
                    return Err(RunnerError::ExecutableNotFound {
                        path: program.clone(),
                    });
                }
            }
        }

        tokio::fs::create_dir_all(&self.config.work_dir).await?;
        Ok(())
    }
}
