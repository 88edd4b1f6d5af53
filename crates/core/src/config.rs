use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::assets;
use crate::backend::InferenceBackend;
use crate::stages::interpolate::MAX_INTERPOLATION_STEPS;
use crate::types::Asset;

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "FRAMETWEEN_DATA_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub paths: PathsConfig,
    pub fetch: FetchConfig,
    pub model: ModelConfig,
    pub encode: EncodeConfig,
    pub pipeline: PipelineConfig,
    /// Overrides the built-in asset manifest when non-empty.
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub models_dir: PathBuf,
    pub staging_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FetchConfig {
    /// Parallel fetcher, invoked as `<tool> <url> <dest>`.
    pub primary_tool: String,
    /// Single-stream fetcher, invoked as `<tool> <url> -O <dest>`.
    pub fallback_tool: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Model file name inside `models_dir`.
    pub file_name: String,
    pub backend: InferenceBackend,
    pub memory_growth: bool,
    /// Spatial dims are padded to a multiple of this before inference.
    pub pad_align: usize,
    pub input_a: String,
    pub input_b: String,
    pub input_time: String,
    pub output: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EncodeConfig {
    pub decoder: String,
    pub encoder: String,
    pub codec: String,
    pub crf: u32,
    pub pixel_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub default_fps: u32,
    pub default_steps: u32,
    /// Leave staged frames on disk after a run for inspection.
    pub keep_staging: bool,
    pub output_prefix: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            models_dir: PathBuf::from("models"),
            staging_dir: PathBuf::from("frames"),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            primary_tool: "pget".to_string(),
            fallback_tool: "wget".to_string(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            file_name: assets::MODEL_FILE_NAME.to_string(),
            backend: InferenceBackend::default(),
            memory_growth: true,
            pad_align: 64,
            input_a: "x0".to_string(),
            input_b: "x1".to_string(),
            input_time: "time".to_string(),
            output: "image".to_string(),
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            decoder: "ffmpeg".to_string(),
            encoder: "ffmpeg".to_string(),
            codec: "libx264".to_string(),
            crf: 1,
            pixel_format: "yuv420p".to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_fps: 24,
            default_steps: 1,
            keep_staging: true,
            output_prefix: "smooth_".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config TOML: {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the CLI would also refuse.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.default_steps > MAX_INTERPOLATION_STEPS {
            bail!(
                "pipeline.default_steps = {} exceeds the maximum of {MAX_INTERPOLATION_STEPS}",
                self.pipeline.default_steps
            );
        }
        if self.pipeline.default_fps == 0 {
            bail!("pipeline.default_fps must be at least 1");
        }
        Ok(())
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Configured manifest (or the built-in one) with every local path
    /// resolved under the models directory.
    pub fn asset_manifest(&self, data_dir: &Path) -> Vec<Asset> {
        let models_dir = self.models_dir(data_dir);
        let declared = if self.assets.is_empty() {
            assets::builtin_manifest()
        } else {
            self.assets.clone()
        };
        declared
            .iter()
            .map(|asset| asset.resolved_under(&models_dir))
            .collect()
    }

    pub fn models_dir(&self, data_dir: &Path) -> PathBuf {
        resolve_relative_to(data_dir, &self.paths.models_dir)
    }

    pub fn staging_dir(&self, data_dir: &Path) -> PathBuf {
        resolve_relative_to(data_dir, &self.paths.staging_dir)
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. FRAMETWEEN_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

/// Create the data directory and a default config.toml on first run.
/// An existing config file is never overwritten.
pub fn initialize_data_dir(data_dir: &Path) -> Result<()> {
    fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let cfg_path = config_path(data_dir);
    if !cfg_path.exists() {
        AppConfig::default().save_to_path(&cfg_path)?;
    }

    Ok(())
}

/// Returns the path as-is if absolute, otherwise joins it to base.
pub fn resolve_relative_to(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
