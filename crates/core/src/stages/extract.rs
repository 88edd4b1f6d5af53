use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::ExtractError;
use crate::tool::ExternalTool;

/// Pattern handed to the decoder: 1-based, 4-digit zero padded.
pub const EXTRACT_PATTERN: &str = "%04d.png";

/// Splits a video into numbered PNG stills with an external decoder.
#[derive(Debug, Clone)]
pub struct FrameExtractor {
    decoder: String,
}

impl FrameExtractor {
    pub fn new(decoder: impl Into<String>) -> Self {
        Self {
            decoder: decoder.into(),
        }
    }

    pub fn build_args(input: &Path, output_dir: &Path) -> Vec<String> {
        vec![
            "-i".to_string(),
            input.to_string_lossy().into_owned(),
            output_dir.join(EXTRACT_PATTERN).to_string_lossy().into_owned(),
        ]
    }

    /// Decode `input` into `output_dir` and return the frame files in
    /// temporal order. `output_dir` must already exist.
    pub fn extract(
        &self,
        tool: &dyn ExternalTool,
        input: &Path,
        output_dir: &Path,
    ) -> Result<Vec<PathBuf>, ExtractError> {
        if !input.is_file() {
            return Err(ExtractError::MissingInput(input.to_path_buf()));
        }

        info!(input = %input.display(), dir = %output_dir.display(), "extracting frames");
        tool.run(&self.decoder, &Self::build_args(input, output_dir))?;

        let frames = list_frames(output_dir)?;
        if frames.is_empty() {
            return Err(ExtractError::NoFrames(output_dir.to_path_buf()));
        }

        info!(count = frames.len(), "frames extracted");
        Ok(frames)
    }
}

/// PNG files directly inside `dir`, ordered by (name length, name).
///
/// For equal-width zero-padded names this is plain lexicographic order;
/// past the padding width (frame 10000 and up) it stays numeric.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    let listing_err = |source| ExtractError::Listing {
        path: dir.to_path_buf(),
        source,
    };

    let mut frames = Vec::new();
    for entry in fs::read_dir(dir).map_err(listing_err)? {
        let path = entry.map_err(listing_err)?.path();
        let is_png = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"));
        if is_png && path.is_file() {
            frames.push(path);
        }
    }

    frames.sort_by(|a, b| {
        let a_name = a.file_name().unwrap_or_default();
        let b_name = b.file_name().unwrap_or_default();
        a_name
            .len()
            .cmp(&b_name.len())
            .then_with(|| a_name.cmp(b_name))
    });
    Ok(frames)
}
