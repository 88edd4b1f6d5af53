use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb32FImage, RgbImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// A still image as an HWC `f32` tensor with samples in `[0, 1]`.
///
/// Sequence position is implied by where the frame sits in its
/// [`FrameSequence`]; it is never stored on the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pixels: Array3<f32>,
}

/// Ordered frames. Order is temporal order in the source video.
pub type FrameSequence = Vec<Frame>;

impl Frame {
    pub const CHANNELS: usize = 3;

    /// Wrap an HWC tensor. Returns `None` unless the last axis has 3 channels.
    pub fn from_hwc(pixels: Array3<f32>) -> Option<Self> {
        (pixels.shape()[2] == Self::CHANNELS).then_some(Self { pixels })
    }

    pub fn filled(height: usize, width: usize, value: f32) -> Self {
        Self {
            pixels: Array3::from_elem((height, width, Self::CHANNELS), value),
        }
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn pixels(&self) -> &Array3<f32> {
        &self.pixels
    }

    /// 8- and 16-bit sources both normalize to `[0, 1]`.
    pub fn from_image(image: &DynamicImage) -> Self {
        let rgb: Rgb32FImage = image.to_rgb32f();
        let (w, h) = (rgb.width() as usize, rgb.height() as usize);
        let pixels = Array3::from_shape_vec((h, w, Self::CHANNELS), rgb.into_raw())
            .unwrap_or_else(|_| Array3::zeros((h, w, Self::CHANNELS)));
        Self { pixels }
    }

    pub fn open(path: &Path) -> Result<Self, image::ImageError> {
        image::open(path).map(|img| Self::from_image(&img))
    }

    pub fn to_rgb8(&self) -> RgbImage {
        let (h, w) = (self.height(), self.width());
        let data: Vec<u8> = self
            .pixels
            .iter()
            .map(|v| (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8)
            .collect();
        RgbImage::from_raw(w as u32, h as u32, data)
            .unwrap_or_else(|| RgbImage::new(w as u32, h as u32))
    }

    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        self.to_rgb8()
            .save_with_format(path, image::ImageFormat::Png)
    }
}

/// A remote model artifact and where it lives locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(rename = "url")]
    pub source_url: String,
    #[serde(rename = "path")]
    pub local_path: PathBuf,
}

impl Asset {
    pub fn new(source_url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            local_path: local_path.into(),
        }
    }

    /// Copy with `local_path` resolved against `base` when relative.
    pub fn resolved_under(&self, base: &Path) -> Self {
        Self {
            source_url: self.source_url.clone(),
            local_path: crate::config::resolve_relative_to(base, &self.local_path),
        }
    }
}

/// One invocation of the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub target_fps: u32,
    pub interpolation_steps: u32,
}

impl RunRequest {
    pub const DEFAULT_FPS: u32 = 24;
    pub const DEFAULT_STEPS: u32 = 1;

    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            output_path: None,
            target_fps: Self::DEFAULT_FPS,
            interpolation_steps: Self::DEFAULT_STEPS,
        }
    }

    pub fn with_fps(mut self, fps: u32) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.interpolation_steps = steps;
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output_path = Some(output.into());
        self
    }

    /// Explicit output, or `<input dir>/<prefix><input file name>`.
    pub fn resolved_output(&self, prefix: &str) -> PathBuf {
        if let Some(output) = &self.output_path {
            return output.clone();
        }
        let file_name = self
            .input_path
            .file_name()
            .map(|name| format!("{prefix}{}", name.to_string_lossy()))
            .unwrap_or_else(|| format!("{prefix}output.mp4"));
        match self.input_path.parent() {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_non_rgb_tensors() {
        assert!(Frame::from_hwc(Array3::zeros((2, 2, 4))).is_none());
        let frame = Frame::from_hwc(Array3::zeros((2, 5, 3))).expect("rgb tensor");
        assert_eq!(frame.height(), 2);
        assert_eq!(frame.width(), 5);
    }

    #[test]
    fn rgb8_conversion_rounds_and_clamps() {
        let mut pixels = Array3::<f32>::zeros((1, 2, 3));
        pixels[[0, 0, 0]] = 0.5;
        pixels[[0, 0, 1]] = 1.7;
        pixels[[0, 0, 2]] = -0.2;
        pixels[[0, 1, 0]] = 1.0;
        let frame = Frame::from_hwc(pixels).expect("rgb tensor");

        let rgb = frame.to_rgb8();
        assert_eq!(rgb.get_pixel(0, 0).0, [128, 255, 0]);
        assert_eq!(rgb.get_pixel(1, 0).0, [255, 0, 0]);
    }

    #[test]
    fn png_roundtrip_preserves_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("frame.png");

        let mut image = RgbImage::new(3, 2);
        image.put_pixel(2, 1, image::Rgb([255, 0, 51]));
        image.save(&path).expect("png should save");

        let frame = Frame::open(&path).expect("png should load");
        assert_eq!((frame.height(), frame.width()), (2, 3));
        assert!((frame.pixels()[[1, 2, 0]] - 1.0).abs() < 1e-6);
        assert!((frame.pixels()[[1, 2, 2]] - 0.2).abs() < 1e-6);
        assert_eq!(frame.to_rgb8(), image);
    }

    #[test]
    fn default_output_sits_next_to_input_with_prefix() {
        let request = RunRequest::new("/videos/clip.mp4");
        assert_eq!(
            request.resolved_output("smooth_"),
            PathBuf::from("/videos/smooth_clip.mp4")
        );
    }

    #[test]
    fn explicit_output_wins() {
        let request = RunRequest::new("/videos/clip.mp4").with_output("/tmp/out.mp4");
        assert_eq!(
            request.resolved_output("smooth_"),
            PathBuf::from("/tmp/out.mp4")
        );
    }

    #[test]
    fn run_request_defaults() {
        let request = RunRequest::new("clip.mp4");
        assert_eq!(request.target_fps, 24);
        assert_eq!(request.interpolation_steps, 1);
        assert_eq!(request.output_path, None);
        assert_eq!(
            request.resolved_output("smooth_"),
            PathBuf::from("smooth_clip.mp4")
        );
    }

    #[test]
    fn asset_resolves_relative_paths_only() {
        let base = Path::new("/opt/models");
        let relative = Asset::new("https://example.com/a.onnx", "film/a.onnx");
        let absolute = Asset::new("https://example.com/b.onnx", "/srv/b.onnx");

        assert_eq!(
            relative.resolved_under(base).local_path,
            PathBuf::from("/opt/models/film/a.onnx")
        );
        assert_eq!(
            absolute.resolved_under(base).local_path,
            PathBuf::from("/srv/b.onnx")
        );
    }
}
