//! Error taxonomy for the interpolation pipeline.
//!
//! Every stage has its own error type so the orchestrator can report which
//! transition failed. Edges that only need context (config, CLI, inference
//! internals) use `anyhow` instead.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Failure while invoking an external program (ffmpeg, pget, wget, ...).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{program}` was not found on this system")]
    NotFound { program: String },

    #[error("failed to launch `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` exited with {status}{}", format_stderr_tail(.stderr_tail))]
    Failed {
        program: String,
        status: String,
        stderr_tail: String,
    },
}

fn format_stderr_tail(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

/// Both transfer methods failed for one asset.
#[derive(Debug, Error)]
#[error("failed to fetch {asset}")]
pub struct FetchError {
    pub asset: String,
    #[source]
    pub cause: FetchCause,
}

#[derive(Debug, Error)]
pub enum FetchCause {
    #[error("invalid asset URL: {0}")]
    InvalidUrl(String),

    #[error("failed to create {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Transfer(#[from] ToolError),

    #[error("transfer reported success but {path} is missing or empty")]
    EmptyDownload { path: PathBuf },

    #[error("download task aborted: {0}")]
    TaskAborted(String),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("model file not found: {0}")]
    MissingModel(PathBuf),

    #[error("failed to build inference session for {path}")]
    Session {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("input video does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("frame extraction failed")]
    Tool(#[from] ToolError),

    #[error("no frames were extracted into {0}")]
    NoFrames(PathBuf),

    #[error("failed to list extracted frames in {path}")]
    Listing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("video encoding failed")]
    Tool(#[from] ToolError),

    #[error("encoder reported success but {0} was not written")]
    MissingOutput(PathBuf),
}

/// Filesystem failure while staging frames.
#[derive(Debug, Error)]
pub enum StageIoError {
    #[error("failed to prepare staging directory {path}")]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read frame {path}")]
    ReadFrame {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to write frame {path}")]
    WriteFrame {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Position in the pipeline state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    AssetsReady,
    ModelReady,
    Extracted,
    Interpolated,
    Written,
    Encoded,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::AssetsReady => "assets-ready",
            Self::ModelReady => "model-ready",
            Self::Extracted => "extracted",
            Self::Interpolated => "interpolated",
            Self::Written => "written",
            Self::Encoded => "encoded",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Io(#[from] StageIoError),
    #[error(transparent)]
    Interpolate(anyhow::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Terminal `Failed(stage, cause)` state. `stage` is the state the pipeline
/// was trying to reach.
#[derive(Debug, Error)]
#[error("pipeline failed before reaching `{stage}`")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: StageError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: impl Into<StageError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }
}
