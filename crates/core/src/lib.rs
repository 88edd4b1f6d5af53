//! Core crate for the frametween interpolation pipeline.

pub mod assets;
pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod runtime;
pub mod stages;
pub mod tool;
pub mod types;

pub use error::{PipelineError, Stage};
pub use pipeline::{bootstrap, Pipeline};
pub use types::{Asset, Frame, FrameSequence, RunRequest};
