use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::EncodeConfig;
use crate::error::EncodeError;
use crate::stages::write::WRITE_PATTERN;
use crate::tool::ExternalTool;

/// Reassembles `%08d.png` frames into a video with a fixed quality policy.
#[derive(Debug, Clone)]
pub struct VideoEncoder {
    /// Encoder binary (e.g. "ffmpeg").
    pub program: String,
    /// Video codec (e.g. "libx264").
    pub codec: String,
    /// Constant Rate Factor; 1 is near-lossless.
    pub crf: u32,
    /// Output pixel format (e.g. "yuv420p").
    pub pixel_format: String,
}

impl Default for VideoEncoder {
    fn default() -> Self {
        Self::from_config(&EncodeConfig::default())
    }
}

impl VideoEncoder {
    pub fn from_config(config: &EncodeConfig) -> Self {
        Self {
            program: config.encoder.clone(),
            codec: config.codec.clone(),
            crf: config.crf,
            pixel_format: config.pixel_format.clone(),
        }
    }

    pub fn build_args(&self, frame_dir: &Path, fps: u32, output: &Path) -> Vec<String> {
        vec![
            "-y".into(),
            "-r".into(),
            fps.to_string(),
            "-i".into(),
            frame_dir.join(WRITE_PATTERN).to_string_lossy().into_owned(),
            "-vcodec".into(),
            self.codec.clone(),
            "-crf".into(),
            self.crf.to_string(),
            "-pix_fmt".into(),
            self.pixel_format.clone(),
            output.to_string_lossy().into_owned(),
        ]
    }

    /// Encode the frames in `frame_dir` at `fps`, overwriting `output`.
    pub fn encode(
        &self,
        tool: &dyn ExternalTool,
        frame_dir: &Path,
        fps: u32,
        output: &Path,
    ) -> Result<PathBuf, EncodeError> {
        info!(
            dir = %frame_dir.display(),
            fps,
            codec = %self.codec,
            output = %output.display(),
            "encoding video"
        );
        tool.run(&self.program, &self.build_args(frame_dir, fps, output))?;

        if !output.is_file() {
            return Err(EncodeError::MissingOutput(output.to_path_buf()));
        }
        Ok(output.to_path_buf())
    }
}
