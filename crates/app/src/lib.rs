use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use frametween_core::assets::{AssetFetcher, FetchOutcome};
use frametween_core::bootstrap;
use frametween_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use frametween_core::logging::{
    self, FileSinkPlan, LoggingInitOptions, RedactingMakeWriter, DEFAULT_LOG_FILTER,
};
use frametween_core::stages::interpolate::MAX_INTERPOLATION_STEPS;
use frametween_core::tool::{ExternalTool, ProcessRunner};

#[derive(Parser)]
#[command(
    name = "frametween",
    version,
    about = "Smooth videos by synthesizing in-between frames"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(
        long,
        global = true,
        help = "Data directory holding config.toml, models and logs"
    )]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpolate a video and write the smoothed result.
    Run(RunArgs),
    /// Download the model assets without running the pipeline.
    Fetch,
}

#[derive(Args)]
struct RunArgs {
    #[arg(help = "Input video")]
    input: PathBuf,
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Playback rate of the output video (default from config)"
    )]
    fps: Option<u32>,
    #[arg(
        long,
        value_parser = clap::value_parser!(u32).range(0..=i64::from(MAX_INTERPOLATION_STEPS)),
        help = "Recursive interpolation steps; each step doubles the frame density"
    )]
    steps: Option<u32>,
    #[arg(
        short = 'o',
        long,
        help = "Output video (default: prefixed file next to input)"
    )]
    output: Option<PathBuf>,
    #[arg(
        long,
        conflicts_with = "clean_staging",
        help = "Leave staged frames on disk"
    )]
    keep_staging: bool,
    #[arg(long, help = "Remove staged frames after the run")]
    clean_staging: bool,
}

impl RunArgs {
    fn keep_staging_override(&self) -> Option<bool> {
        match (self.keep_staging, self.clean_staging) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    frametween_core::runtime::setup_runtime_libs();
    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    frametween_core::runtime::log_runtime_lib_status();
    log_startup_metadata(&resolved_data_dir);

    initialize_data_dir(&resolved_data_dir)?;
    let cfg_path = config_path(&resolved_data_dir);
    let config = AppConfig::load_from_path(&cfg_path)
        .with_context(|| format!("failed to load config from {}", cfg_path.display()))?;
    let tool: Arc<dyn ExternalTool> = Arc::new(ProcessRunner::new());

    match cli.command {
        Commands::Run(args) => run_pipeline(args, config, resolved_data_dir, tool).await,
        Commands::Fetch => fetch_assets(&config, &resolved_data_dir, tool).await,
    }
}

async fn run_pipeline(
    args: RunArgs,
    config: AppConfig,
    data_dir: PathBuf,
    tool: Arc<dyn ExternalTool>,
) -> Result<()> {
    let mut pipeline = bootstrap(&config, &data_dir, tool).await?;
    if let Some(keep) = args.keep_staging_override() {
        pipeline = pipeline.with_keep_staging(keep);
    }

    let mut request = pipeline.request(&args.input);
    if let Some(fps) = args.fps {
        request = request.with_fps(fps);
    }
    if let Some(steps) = args.steps {
        request = request.with_steps(steps);
    }
    if let Some(output) = args.output {
        request = request.with_output(output);
    }

    let output = tokio::task::spawn_blocking(move || pipeline.run(&request))
        .await
        .context("pipeline task panicked")?;

    match output {
        Some(path) => {
            println!("{}", path.display());
            Ok(())
        }
        None => bail!("no output produced for {}", args.input.display()),
    }
}

async fn fetch_assets(
    config: &AppConfig,
    data_dir: &Path,
    tool: Arc<dyn ExternalTool>,
) -> Result<()> {
    let manifest = config.asset_manifest(data_dir);
    let reports = AssetFetcher::from_config(tool, &config.fetch)
        .ensure_all(&manifest)
        .await?;

    for report in &reports {
        let outcome = match report.outcome {
            FetchOutcome::Skipped => "present".to_string(),
            FetchOutcome::Transferred(method) => format!("downloaded ({method})"),
        };
        println!("{:<12} {}", outcome, report.asset.local_path.display());
    }
    Ok(())
}

#[cfg(test)]
fn select_log_filter(
    noise_base: &str,
    rust_log_env: Option<&str>,
    verbose: u8,
    cli_log_filter: Option<&str>,
) -> String {
    let options = LoggingInitOptions {
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: rust_log_env.map(ToString::to_string),
        noise_filter: noise_base.to_string(),
        ..Default::default()
    };

    logging::compose_logging_filters(&options).console_filter
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let console_filter = init_plan.filters.console_filter;
    let file_filter = init_plan.filters.file_filter;

    match init_plan.file_sink {
        FileSinkPlan::Ready { appender, .. } => {
            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(parse_env_filter_with_fallback(&console_filter, "console")),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(RedactingMakeWriter::new(appender))
                        .with_filter(parse_env_filter_with_fallback(&file_filter, "file")),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback {
            attempted_log_dir,
            reason,
        } => {
            let attempted_log_dir = attempted_log_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());

            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(parse_env_filter_with_fallback(&console_filter, "console")),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = %attempted_log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}


#[cfg(test)]
mod log_filter_tests {
    use super::*;

    const NOISE: &str = "ort=error,tool_stderr=error";

    #[test]
    fn uses_noise_and_default_info_without_overrides() {
        let selected = select_log_filter(NOISE, None, 0, None);
        assert_eq!(selected, format!("{NOISE},info"));
    }

    #[test]
    fn uses_noise_with_rust_log_when_no_cli_overrides() {
        let selected = select_log_filter(NOISE, Some("debug"), 0, None);
        assert_eq!(selected, format!("{NOISE},debug"));
    }

    #[test]
    fn verbose_flag_overrides_rust_log() {
        let selected = select_log_filter(NOISE, Some("info"), 1, None);
        assert_eq!(selected, "debug");
    }

    #[test]
    fn double_verbose_enables_trace() {
        let selected = select_log_filter(NOISE, Some("info"), 2, None);
        assert_eq!(selected, "trace");
    }

    #[test]
    fn explicit_log_filter_has_highest_precedence() {
        let selected = select_log_filter(NOISE, Some("warn"), 2, Some("frametween_core=trace"));
        assert_eq!(selected, "frametween_core=trace");
    }
}
