//! Inference backend selection and `ort::Session` construction.
//!
//! [`build_session`] registers the execution providers for the chosen
//! [`InferenceBackend`]; ONNX Runtime falls back to CPU on its own when a
//! registered provider cannot be initialized.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use ort::{
    execution_providers::{
        ArenaExtendStrategy, CUDAExecutionProvider, ExecutionProvider, TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Default is `Cuda`. `Tensorrt` needs the TensorRT runtime libraries and
/// falls back to the CUDA provider when they are missing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferenceBackend {
    #[default]
    Cuda,
    Tensorrt,
    Cpu,
}

impl InferenceBackend {
    pub fn uses_gpu(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl std::fmt::Display for InferenceBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cuda => write!(f, "cuda"),
            Self::Tensorrt => write!(f, "tensorrt"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

pub struct SessionConfig<'a> {
    pub model_path: &'a Path,
    pub backend: InferenceBackend,
    /// First accelerator index reported by the device query.
    pub device_id: i32,
    /// Grow the device arena by exactly what each allocation asks for
    /// instead of reserving in power-of-two chunks.
    pub memory_growth: bool,
    pub trt_cache_dir: Option<&'a Path>,
}

fn cuda_provider(config: &SessionConfig<'_>) -> CUDAExecutionProvider {
    let cuda = CUDAExecutionProvider::default().with_device_id(config.device_id);
    if config.memory_growth {
        cuda.with_arena_extend_strategy(ArenaExtendStrategy::SameAsRequested)
    } else {
        cuda
    }
}

pub fn build_session(config: &SessionConfig<'_>) -> Result<Session> {
    let builder = Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;
    let started = Instant::now();

    let session = match config.backend {
        InferenceBackend::Tensorrt => {
            let cache_dir = config
                .trt_cache_dir
                .unwrap_or_else(|| Path::new("trt_cache"));

            if let Err(e) = std::fs::create_dir_all(cache_dir) {
                warn!(
                    dir = %cache_dir.display(),
                    error = %e,
                    "Failed to create TRT cache directory"
                );
            }

            info!(
                cache_dir = %cache_dir.display(),
                device_id = config.device_id,
                "Initializing TensorRT session (first run may take several minutes)"
            );

            builder
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_engine_cache(true)
                        .with_engine_cache_path(cache_dir.to_string_lossy().to_string())
                        .with_fp16(true)
                        .with_device_id(config.device_id)
                        .build(),
                    cuda_provider(config).build(),
                ])?
                .commit_from_file(config.model_path)
                .with_context(|| {
                    format!("Failed to load ONNX model: {}", config.model_path.display())
                })?
        }
        InferenceBackend::Cuda => {
            if !CUDAExecutionProvider::default().is_available().unwrap_or(false) {
                warn!("CUDA EP is not available, inference will fall back to CPU");
            }

            debug!(
                backend = "cuda",
                device_id = config.device_id,
                memory_growth = config.memory_growth,
                "Building session with CUDA EP"
            );

            builder
                .with_execution_providers([cuda_provider(config).build()])?
                .commit_from_file(config.model_path)
                .with_context(|| {
                    format!("Failed to load ONNX model: {}", config.model_path.display())
                })?
        }
        InferenceBackend::Cpu => {
            debug!(backend = "cpu", "Building session without accelerators");
            builder.commit_from_file(config.model_path).with_context(|| {
                format!("Failed to load ONNX model: {}", config.model_path.display())
            })?
        }
    };

    info!(
        backend = %config.backend,
        model = %config.model_path.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Inference session ready"
    );

    Ok(session)
}
