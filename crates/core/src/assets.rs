//! Materializes the model asset manifest on local disk.
//!
//! Every asset is fetched on its own blocking task. A file that already
//! exists with non-zero length counts as fetched; nothing is checksummed.
//! Failed transfers may leave partial files behind.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::error::{FetchCause, FetchError};
use crate::logging::redact_sensitive_text;
use crate::tool::ExternalTool;
use crate::types::Asset;

pub const MODEL_FILE_NAME: &str = "film_net.onnx";

const WEIGHTS_BASE_URL: &str = "https://storage.googleapis.com/replicate-weights/film/onnx";

/// Model artifacts needed before the first run, relative to the models dir.
///
/// Deployments that host their own ONNX export set `[[assets]]` in
/// `config.toml`, which replaces this list entirely.
pub fn builtin_manifest() -> Vec<Asset> {
    [MODEL_FILE_NAME, "film_net.onnx.data"]
        .into_iter()
        .map(|name| Asset::new(format!("{WEIGHTS_BASE_URL}/{name}"), name))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMethod {
    Primary,
    Fallback,
}

impl fmt::Display for TransferMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Local file was already present and non-empty.
    Skipped,
    Transferred(TransferMethod),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchReport {
    pub asset: Asset,
    pub outcome: FetchOutcome,
    pub elapsed: Duration,
}

/// Fetches assets with a primary tool (`<tool> <url> <dest>`) and falls back
/// to a second one (`<tool> <url> -O <dest>`).
#[derive(Clone)]
pub struct AssetFetcher {
    tool: Arc<dyn ExternalTool>,
    primary: String,
    fallback: String,
}

impl fmt::Debug for AssetFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetFetcher")
            .field("primary", &self.primary)
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}

impl AssetFetcher {
    pub fn new(
        tool: Arc<dyn ExternalTool>,
        primary: impl Into<String>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            tool,
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    pub fn from_config(tool: Arc<dyn ExternalTool>, config: &FetchConfig) -> Self {
        Self::new(tool, &config.primary_tool, &config.fallback_tool)
    }

    /// Fetch every asset concurrently. Returns one report per asset in
    /// manifest order, or the first failure observed.
    ///
    /// Returning early does not stop sibling transfers: blocking tasks run
    /// to completion in the background and may still write their files.
    pub async fn ensure_all(&self, manifest: &[Asset]) -> Result<Vec<FetchReport>, FetchError> {
        let started = Instant::now();
        let mut tasks = JoinSet::new();

        for (index, asset) in manifest.iter().enumerate() {
            let fetcher = self.clone();
            let asset = asset.clone();
            tasks.spawn_blocking(move || (index, fetcher.ensure_one(&asset)));
        }

        let mut reports: Vec<Option<FetchReport>> = vec![None; manifest.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report))) => reports[index] = Some(report),
                Ok((_, Err(err))) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    tasks.abort_all();
                    return Err(FetchError {
                        asset: "<download task>".to_string(),
                        cause: FetchCause::TaskAborted(join_err.to_string()),
                    });
                }
            }
        }

        let reports: Vec<FetchReport> = reports.into_iter().flatten().collect();
        let transferred = reports
            .iter()
            .filter(|r| r.outcome != FetchOutcome::Skipped)
            .count();
        info!(
            assets = reports.len(),
            transferred,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "asset manifest ready"
        );
        Ok(reports)
    }

    /// Fetch one asset, blocking until the transfer finishes.
    pub fn ensure_one(&self, asset: &Asset) -> Result<FetchReport, FetchError> {
        let started = Instant::now();
        let name = display_name(asset);
        let fail = |cause: FetchCause| FetchError {
            asset: name.clone(),
            cause,
        };

        let dest = asset.local_path.as_path();

        if is_materialized(dest) {
            info!(dest = %dest.display(), "asset already present, skipping download");
            return Ok(FetchReport {
                asset: asset.clone(),
                outcome: FetchOutcome::Skipped,
                elapsed: started.elapsed(),
            });
        }

        let url = parse_http_url(&asset.source_url).map_err(fail)?;
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| {
                fail(FetchCause::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })
            })?;
        }

        info!(url = %name, dest = %dest.display(), "starting asset download");
        let method = self.transfer(&url, dest).map_err(fail)?;
        let elapsed = started.elapsed();
        info!(
            dest = %dest.display(),
            method = %method,
            elapsed_secs = elapsed.as_secs_f64(),
            "asset download completed"
        );

        Ok(FetchReport {
            asset: asset.clone(),
            outcome: FetchOutcome::Transferred(method),
            elapsed,
        })
    }

    fn transfer(&self, url: &Url, dest: &Path) -> Result<TransferMethod, FetchCause> {
        let url_arg = url.to_string();
        let dest_arg = dest.to_string_lossy().into_owned();

        if self.tool.is_available(&self.primary) {
            match self.attempt(&self.primary, &[url_arg.clone(), dest_arg.clone()], dest) {
                Ok(()) => return Ok(TransferMethod::Primary),
                Err(err) => warn!(
                    tool = %self.primary,
                    error = %err,
                    "primary download failed, falling back to {}",
                    self.fallback
                ),
            }
        } else {
            warn!(
                tool = %self.primary,
                "primary download tool not found, using {}",
                self.fallback
            );
        }

        self.attempt(&self.fallback, &[url_arg, "-O".to_string(), dest_arg], dest)?;
        Ok(TransferMethod::Fallback)
    }

    fn attempt(&self, program: &str, args: &[String], dest: &Path) -> Result<(), FetchCause> {
        self.tool.run(program, args)?;
        if !is_materialized(dest) {
            return Err(FetchCause::EmptyDownload {
                path: dest.to_path_buf(),
            });
        }
        Ok(())
    }
}

fn is_materialized(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|meta| meta.is_file() && meta.len() > 0)
}

fn display_name(asset: &Asset) -> String {
    match Url::parse(&asset.source_url) {
        Ok(url) => redacted_url_for_display(&url),
        Err(_) => redact_sensitive_text(&asset.source_url),
    }
}

fn parse_http_url(raw: &str) -> Result<Url, FetchCause> {
    let parsed = Url::parse(raw).map_err(|e| {
        FetchCause::InvalidUrl(format!("{}: {e}", redact_sensitive_text(raw)))
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        scheme => Err(FetchCause::InvalidUrl(format!(
            "unsupported scheme '{scheme}' for '{}' (expected http/https)",
            redacted_url_for_display(&parsed)
        ))),
    }
}

fn redacted_url_for_display(url: &Url) -> String {
    let mut redacted = url.clone();
    if redacted.query().is_some() {
        redacted.set_query(Some("<redacted>"));
    }
    if !redacted.username().is_empty() || redacted.password().is_some() {
        let _ = redacted.set_username("");
        let _ = redacted.set_password(None);
    }
    redacted.to_string()
}
