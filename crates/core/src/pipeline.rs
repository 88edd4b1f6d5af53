//! Orchestrates one interpolation run over the staged filesystem layout:
//!
//! ```text
//! <staging>/0001.png ...                         extracted frames
//! <staging>/interpolated_frames/00000000.png ... frames handed to the encoder
//! ```
//!
//! Assets and the model are prepared once by [`bootstrap`]; every later
//! [`Pipeline::run`] reuses them.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use tracing::{error, info, warn};

use crate::assets::AssetFetcher;
use crate::config::AppConfig;
use crate::error::{LoadError, PipelineError, Stage, StageError, StageIoError};
use crate::model::ModelHandle;
use crate::stages::write::reset_dir;
use crate::stages::{
    interpolate_recursively, write_all, FrameExtractor, FrameInterpolator, VideoEncoder,
};
use crate::tool::ExternalTool;
use crate::types::{Frame, RunRequest};

pub const INTERPOLATED_DIR_NAME: &str = "interpolated_frames";

/// Fetch the asset manifest and load the model. Either failure is fatal:
/// no run can happen without them.
pub async fn bootstrap(
    config: &AppConfig,
    data_dir: &Path,
    tool: Arc<dyn ExternalTool>,
) -> Result<Pipeline<ModelHandle>, PipelineError> {
    info!(stage = %Stage::Init, "bootstrapping pipeline");

    let manifest = config.asset_manifest(data_dir);
    AssetFetcher::from_config(tool.clone(), &config.fetch)
        .ensure_all(&manifest)
        .await
        .map_err(|e| PipelineError::new(Stage::AssetsReady, e))?;
    info!(stage = %Stage::AssetsReady, assets = manifest.len(), "stage reached");

    let models_dir = config.models_dir(data_dir);
    let model_config = config.model.clone();
    let loader_tool = tool.clone();
    let model = tokio::task::spawn_blocking(move || {
        ModelHandle::load(&models_dir, &model_config, loader_tool.as_ref())
    })
    .await
    .map_err(|join_err| {
        PipelineError::new(
            Stage::ModelReady,
            LoadError::Session {
                path: config.models_dir(data_dir),
                source: anyhow!("model loader task failed: {join_err}"),
            },
        )
    })?
    .map_err(|e| PipelineError::new(Stage::ModelReady, e))?;
    info!(stage = %Stage::ModelReady, "stage reached");

    Ok(Pipeline::from_config(model, tool, config, data_dir))
}

/// Runs extract → interpolate → write → encode against one staging root.
///
/// `run` borrows the pipeline mutably, so a single instance never has two
/// runs sharing its staging directories.
pub struct Pipeline<I> {
    interpolator: I,
    tool: Arc<dyn ExternalTool>,
    staging_root: PathBuf,
    extractor: FrameExtractor,
    encoder: VideoEncoder,
    keep_staging: bool,
    output_prefix: String,
    default_fps: u32,
    default_steps: u32,
}

impl<I: FrameInterpolator<Frame>> Pipeline<I> {
    pub fn new(
        interpolator: I,
        tool: Arc<dyn ExternalTool>,
        staging_root: impl Into<PathBuf>,
    ) -> Self {
        Self::from_parts(
            interpolator,
            tool,
            staging_root.into(),
            &AppConfig::default(),
        )
    }

    pub fn from_config(
        interpolator: I,
        tool: Arc<dyn ExternalTool>,
        config: &AppConfig,
        data_dir: &Path,
    ) -> Self {
        Self::from_parts(interpolator, tool, config.staging_dir(data_dir), config)
    }

    fn from_parts(
        interpolator: I,
        tool: Arc<dyn ExternalTool>,
        staging_root: PathBuf,
        config: &AppConfig,
    ) -> Self {
        Self {
            interpolator,
            tool,
            staging_root,
            extractor: FrameExtractor::new(&config.encode.decoder),
            encoder: VideoEncoder::from_config(&config.encode),
            keep_staging: config.pipeline.keep_staging,
            output_prefix: config.pipeline.output_prefix.clone(),
            default_fps: config.pipeline.default_fps,
            default_steps: config.pipeline.default_steps,
        }
    }

    pub fn with_keep_staging(mut self, keep: bool) -> Self {
        self.keep_staging = keep;
        self
    }

    pub fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    pub fn interpolated_dir(&self) -> PathBuf {
        self.staging_root.join(INTERPOLATED_DIR_NAME)
    }

    /// A request for `input` using the configured fps and step defaults.
    pub fn request(&self, input: impl Into<PathBuf>) -> RunRequest {
        RunRequest::new(input)
            .with_fps(self.default_fps)
            .with_steps(self.default_steps)
    }

    /// Run once. Any stage failure is logged and reported as `None`.
    pub fn run(&mut self, request: &RunRequest) -> Option<PathBuf> {
        match self.try_run(request) {
            Ok(path) => Some(path),
            Err(err) => {
                let stage = err.stage;
                error!(stage = %stage, "{:#}", anyhow::Error::new(err));
                None
            }
        }
    }

    pub fn try_run(&mut self, request: &RunRequest) -> Result<PathBuf, PipelineError> {
        let started = Instant::now();
        let result = self.execute(request);
        self.teardown();

        if let Ok(output) = &result {
            info!(
                stage = %Stage::Done,
                output = %output.display(),
                elapsed_secs = started.elapsed().as_secs_f64(),
                "output video saved"
            );
        }
        result
    }

    fn execute(&self, request: &RunRequest) -> Result<PathBuf, PipelineError> {
        let output = request.resolved_output(&self.output_prefix);
        let interpolated_dir = self.interpolated_dir();
        info!(
            input = %request.input_path.display(),
            output = %output.display(),
            fps = request.target_fps,
            steps = request.interpolation_steps,
            "pipeline run started"
        );

        reset_dir(&self.staging_root).map_err(|e| PipelineError::new(Stage::Extracted, e))?;
        let frame_paths = self
            .extractor
            .extract(self.tool.as_ref(), &request.input_path, &self.staging_root)
            .map_err(|e| PipelineError::new(Stage::Extracted, e))?;
        info!(stage = %Stage::Extracted, frames = frame_paths.len(), "stage reached");

        let frames =
            load_frames(&frame_paths).map_err(|e| PipelineError::new(Stage::Interpolated, e))?;
        let frames =
            interpolate_recursively(frames, request.interpolation_steps, &self.interpolator)
                .map_err(|e| PipelineError::new(Stage::Interpolated, StageError::Interpolate(e)))?;
        info!(stage = %Stage::Interpolated, frames = frames.len(), "stage reached");

        let written = write_all(frames, &interpolated_dir)
            .map_err(|e| PipelineError::new(Stage::Written, e))?;
        info!(stage = %Stage::Written, frames = written.len(), "stage reached");

        let encoded = self
            .encoder
            .encode(
                self.tool.as_ref(),
                &interpolated_dir,
                request.target_fps,
                &output,
            )
            .map_err(|e| PipelineError::new(Stage::Encoded, e))?;
        info!(stage = %Stage::Encoded, "stage reached");

        Ok(encoded)
    }

    fn teardown(&self) {
        if self.keep_staging {
            return;
        }
        match fs::remove_dir_all(&self.staging_root) {
            Ok(()) => info!(dir = %self.staging_root.display(), "staging directory removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                dir = %self.staging_root.display(),
                error = %e,
                "failed to remove staging directory"
            ),
        }
    }
}

fn load_frames(paths: &[PathBuf]) -> Result<Vec<Frame>, StageIoError> {
    paths
        .iter()
        .map(|path| {
            Frame::open(path).map_err(|source| StageIoError::ReadFrame {
                path: path.clone(),
                source,
            })
        })
        .collect()
}
