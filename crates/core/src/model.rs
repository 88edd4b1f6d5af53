//! Process-wide handle to the frame interpolation network.
//!
//! The model is an ONNX export of FILM taking two NHWC frames and a
//! timestep and returning the frame at that time. Spatial dims are padded
//! up to `pad_align` with mirrored edges and the output is cropped back.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use ndarray::{s, Array2, Array4, Ix4};
use ort::{session::Session, value::Tensor};
use tracing::{debug, info, warn};

use crate::backend::{build_session, InferenceBackend, SessionConfig};
use crate::config::ModelConfig;
use crate::error::{LoadError, ToolError};
use crate::stages::FrameInterpolator;
use crate::tool::ExternalTool;
use crate::types::Frame;

const DEVICE_QUERY_TOOL: &str = "nvidia-smi";
const MIDPOINT: f32 = 0.5;

pub struct ModelHandle {
    session: Mutex<Session>,
    model_path: PathBuf,
    backend: InferenceBackend,
    devices: Vec<i32>,
    pad_align: usize,
    input_a: String,
    input_b: String,
    input_time: String,
    output: String,
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_path", &self.model_path)
            .field("backend", &self.backend)
            .field("devices", &self.devices)
            .finish_non_exhaustive()
    }
}

impl ModelHandle {
    /// Build the inference session once for the process.
    ///
    /// Accelerators are queried first; when any exist the device arena is
    /// set to grow on demand. Query failures are logged and treated as
    /// "no accelerator".
    pub fn load(
        model_dir: &Path,
        config: &ModelConfig,
        tool: &dyn ExternalTool,
    ) -> Result<Self, LoadError> {
        let model_path = model_dir.join(&config.file_name);
        if !model_path.is_file() {
            return Err(LoadError::MissingModel(model_path));
        }

        let devices = query_accelerators(tool);
        let backend = if devices.is_empty() && config.backend.uses_gpu() {
            info!(requested = %config.backend, "no accelerator devices found, using CPU");
            InferenceBackend::Cpu
        } else {
            config.backend
        };

        let memory_growth = config.memory_growth && backend.uses_gpu();
        if memory_growth {
            for device in &devices {
                info!(device, "incremental memory growth enabled");
            }
        }

        let trt_cache_dir = model_dir.join("trt_cache");
        let session = build_session(&SessionConfig {
            model_path: &model_path,
            backend,
            device_id: devices.first().copied().unwrap_or(0),
            memory_growth,
            trt_cache_dir: Some(&trt_cache_dir),
        })
        .map_err(|source| LoadError::Session {
            path: model_path.clone(),
            source,
        })?;

        info!(
            model = %model_path.display(),
            backend = %backend,
            devices = devices.len(),
            "interpolation model loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            model_path,
            backend,
            devices,
            pad_align: config.pad_align.max(1),
            input_a: config.input_a.clone(),
            input_b: config.input_b.clone(),
            input_time: config.input_time.clone(),
            output: config.output.clone(),
        })
    }

    /// Synthesize the frame halfway between `a` and `b`.
    pub fn interpolate_pair(&self, a: &Frame, b: &Frame) -> Result<Frame> {
        if (a.height(), a.width()) != (b.height(), b.width()) {
            bail!(
                "frame size mismatch: {}x{} vs {}x{}",
                a.width(),
                a.height(),
                b.width(),
                b.height()
            );
        }
        let (h, w) = (a.height(), a.width());

        let started = Instant::now();
        let x0 = Tensor::from_array(pad_to_batch(a, self.pad_align))?;
        let x1 = Tensor::from_array(pad_to_batch(b, self.pad_align))?;
        let time = Tensor::from_array(Array2::<f32>::from_elem((1, 1), MIDPOINT))?;

        let output = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| anyhow!("model session lock poisoned"))?;
            let outputs = session.run(ort::inputs![
                self.input_a.as_str() => x0,
                self.input_b.as_str() => x1,
                self.input_time.as_str() => time
            ])?;
            outputs[self.output.as_str()]
                .try_extract_array::<f32>()?
                .to_owned()
        };

        let frame = crop_from_batch(output.into_dimensionality::<Ix4>()?, h, w)?;
        debug!(
            elapsed_ms = format!("{:.1}", started.elapsed().as_secs_f64() * 1000.0),
            "midpoint inferred"
        );
        Ok(frame)
    }
}

impl FrameInterpolator<Frame> for ModelHandle {
    fn stage_name(&self) -> &str {
        "film"
    }

    fn interpolate(&self, previous: &Frame, current: &Frame) -> Result<Frame> {
        self.interpolate_pair(previous, current)
    }
}

/// Indices of visible accelerators, or empty when none can be listed.
pub fn query_accelerators(tool: &dyn ExternalTool) -> Vec<i32> {
    let args = [
        "--query-gpu=index".to_string(),
        "--format=csv,noheader".to_string(),
    ];
    match tool.capture(DEVICE_QUERY_TOOL, &args) {
        Ok(stdout) => {
            let devices = parse_device_indices(&stdout);
            info!(count = devices.len(), ?devices, "accelerator devices detected");
            devices
        }
        Err(ToolError::NotFound { .. }) => {
            debug!("{DEVICE_QUERY_TOOL} not found, assuming no accelerators");
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "accelerator query failed, continuing without accelerators");
            Vec::new()
        }
    }
}

fn parse_device_indices(stdout: &str) -> Vec<i32> {
    stdout
        .lines()
        .filter_map(|line| line.trim().parse::<i32>().ok())
        .collect()
}

fn pad_amount(dim: usize, align: usize) -> usize {
    (align - dim % align) % align
}

/// Mirror an out-of-range index back into `0..len`, repeating the edge.
fn mirror(index: usize, len: usize) -> usize {
    let period = 2 * len;
    let m = index % period;
    if m < len {
        m
    } else {
        period - 1 - m
    }
}

/// HWC frame to a `[1, H', W', 3]` batch padded to a multiple of `align`.
fn pad_to_batch(frame: &Frame, align: usize) -> Array4<f32> {
    let (h, w) = (frame.height(), frame.width());
    let padded_h = h + pad_amount(h, align);
    let padded_w = w + pad_amount(w, align);
    let pixels = frame.pixels();

    if padded_h == h && padded_w == w {
        return pixels.clone().insert_axis(ndarray::Axis(0));
    }

    Array4::from_shape_fn((1, padded_h, padded_w, Frame::CHANNELS), |(_, y, x, c)| {
        pixels[[mirror(y, h), mirror(x, w), c]]
    })
}

fn crop_from_batch(batch: Array4<f32>, h: usize, w: usize) -> Result<Frame> {
    let shape = batch.shape();
    if shape[0] < 1 || shape[1] < h || shape[2] < w || shape[3] != Frame::CHANNELS {
        bail!("unexpected model output shape {shape:?} for {w}x{h} input");
    }
    let cropped = batch.slice(s![0, ..h, ..w, ..]).to_owned();
    Frame::from_hwc(cropped).ok_or_else(|| anyhow!("model output is not RGB"))
}

#[cfg(test)]
mod tests {
    use ndarray::Array3;

    use super::*;

    struct DeviceQuery(Result<&'static str, ()>);

    impl ExternalTool for DeviceQuery {
        fn run(&self, _program: &str, _args: &[String]) -> Result<(), ToolError> {
            Ok(())
        }

        fn capture(&self, program: &str, _args: &[String]) -> Result<String, ToolError> {
            match self.0 {
                Ok(out) => Ok(out.to_string()),
                Err(()) => Err(ToolError::Failed {
                    program: program.to_string(),
                    status: "exit status: 9".to_string(),
                    stderr_tail: "NVIDIA-SMI has failed".to_string(),
                }),
            }
        }

        fn is_available(&self, _program: &str) -> bool {
            true
        }
    }

    fn ramp(h: usize, w: usize) -> Frame {
        let pixels = Array3::from_shape_fn((h, w, 3), |(y, x, c)| (y * 100 + x * 10 + c) as f32);
        Frame::from_hwc(pixels).expect("rgb")
    }

    #[test]
    fn device_indices_parse_one_per_line() {
        assert_eq!(parse_device_indices("0\n1\n"), vec![0, 1]);
        assert_eq!(parse_device_indices(" 2 \n\nNo devices\n"), vec![2]);
        assert!(parse_device_indices("").is_empty());
    }

    #[test]
    fn device_query_errors_are_swallowed() {
        assert_eq!(query_accelerators(&DeviceQuery(Ok("0\n3\n"))), vec![0, 3]);
        assert!(query_accelerators(&DeviceQuery(Err(()))).is_empty());
    }

    #[test]
    fn pad_amount_rounds_up_to_alignment() {
        assert_eq!(pad_amount(64, 64), 0);
        assert_eq!(pad_amount(65, 64), 63);
        assert_eq!(pad_amount(720, 64), 48);
        assert_eq!(pad_amount(5, 1), 0);
    }

    #[test]
    fn mirror_repeats_the_edge() {
        let mapped: Vec<usize> = (0..8).map(|i| mirror(i, 3)).collect();
        assert_eq!(mapped, vec![0, 1, 2, 2, 1, 0, 0, 1]);
        assert_eq!(mirror(4, 1), 0);
    }

    #[test]
    fn padding_mirrors_bottom_and_right_edges() {
        let frame = ramp(3, 2);
        let batch = pad_to_batch(&frame, 4);
        assert_eq!(batch.shape(), &[1, 4, 4, 3]);

        assert_eq!(batch[[0, 1, 1, 2]], frame.pixels()[[1, 1, 2]]);
        assert_eq!(batch[[0, 3, 0, 0]], frame.pixels()[[2, 0, 0]]);
        assert_eq!(batch[[0, 0, 2, 1]], frame.pixels()[[0, 1, 1]]);
        assert_eq!(batch[[0, 0, 3, 1]], frame.pixels()[[0, 0, 1]]);
        assert_eq!(batch[[0, 3, 3, 0]], frame.pixels()[[2, 0, 0]]);
    }

    #[test]
    fn aligned_frames_are_not_padded() {
        let frame = ramp(4, 8);
        let batch = pad_to_batch(&frame, 4);
        assert_eq!(batch.shape(), &[1, 4, 8, 3]);
        assert_eq!(batch.index_axis(ndarray::Axis(0), 0), frame.pixels().view());
    }

    #[test]
    fn crop_restores_original_frame() {
        let frame = ramp(5, 7);
        let cropped = crop_from_batch(pad_to_batch(&frame, 8), 5, 7).expect("crop");
        assert_eq!(cropped, frame);
    }

    #[test]
    fn crop_rejects_short_output() {
        let batch = Array4::<f32>::zeros((1, 2, 2, 3));
        assert!(crop_from_batch(batch, 4, 4).is_err());
    }

    #[test]
    fn load_reports_missing_model_before_touching_devices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = ModelHandle::load(dir.path(), &ModelConfig::default(), &DeviceQuery(Err(())))
            .expect_err("missing model");
        assert!(matches!(err, LoadError::MissingModel(ref p) if p.ends_with("film_net.onnx")));
    }

    /// Needs ONNX Runtime and a FILM export at `FRAMETWEEN_TEST_MODEL_DIR`.
    #[test]
    #[ignore]
    fn real_model_midpoint_has_input_shape() {
        let Some(dir) = std::env::var_os("FRAMETWEEN_TEST_MODEL_DIR") else {
            return;
        };
        crate::runtime::setup_runtime_libs();
        let config = ModelConfig {
            backend: InferenceBackend::Cpu,
            ..ModelConfig::default()
        };
        let model = ModelHandle::load(Path::new(&dir), &config, &crate::tool::ProcessRunner::new())
            .expect("model loads");

        let a = Frame::filled(90, 160, 0.0);
        let b = Frame::filled(90, 160, 1.0);
        let mid = model.interpolate_pair(&a, &b).expect("inference");
        assert_eq!((mid.height(), mid.width()), (90, 160));
    }
}
