use anyhow::{Context, Result};
use clap::Parser;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use vtbili_server::config::{AppConfig, CliConfig, FileConfig};
use vtbili_server::datasets::Datasets;
use vtbili_server::orchestrator::{run_service, wait_for_signal, RunSummary};
use vtbili_server::{jobs, Resources};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[clap(version, about = "Collects BiliBili and YouTube livestream metadata on a schedule")]
struct CliArgs {
    /// Path to a TOML config file. Values found there override the command line.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Base directory. Datasets are read from its `dataset` subdirectory.
    #[clap(long, value_parser = parse_path)]
    pub base_path: Option<PathBuf>,

    /// Directory holding the store database, or `:memory:`.
    #[clap(long)]
    pub store_uri: Option<String>,

    /// Name of the store database. Defaults to `vtbili`.
    #[clap(long)]
    pub store_name: Option<String>,

    /// YouTube Data API key.
    #[clap(long, env = "YT_API_KEY", hide_env_values = true)]
    pub youtube_api_key: Option<String>,

    #[clap(long)]
    pub bilibili_api_url: Option<String>,

    #[clap(long)]
    pub youtube_api_url: Option<String>,

    #[clap(long)]
    pub jetri_api_url: Option<String>,

    /// Timeout in seconds for platform API requests.
    #[clap(long)]
    pub request_timeout_sec: Option<u64>,

    /// Seconds to wait for running jobs on shutdown before closing connections.
    #[clap(long)]
    pub shutdown_grace_sec: Option<u64>,

    /// Also write DEBUG level logs to this file.
    #[clap(long, value_parser = parse_path)]
    pub log_file: Option<PathBuf>,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            base_path: self.base_path.clone(),
            store_uri: self.store_uri.clone(),
            store_name: self.store_name.clone(),
            youtube_api_key: self.youtube_api_key.clone(),
            bilibili_api_url: self.bilibili_api_url.clone(),
            youtube_api_url: self.youtube_api_url.clone(),
            jetri_api_url: self.jetri_api_url.clone(),
            request_timeout_sec: self.request_timeout_sec,
            shutdown_grace_sec: self.shutdown_grace_sec,
            log_file: self.log_file.clone(),
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<()> {
    let console = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .with_env_var("LOG_LEVEL")
            .from_env_lossy(),
    );

    let file = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {:?}", path))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::DEBUG),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    info!(
        "First run: {} of {} jobs succeeded",
        summary.bootstrap.succeeded(),
        summary.bootstrap.len()
    );
    for entry in &summary.schedule {
        info!(
            job = %entry.name,
            "{} periodic runs, {} skipped, last outcome {}",
            entry.launches,
            entry.skipped,
            entry.last_outcome.as_str()
        );
    }
    info!(
        "Closed {} connection(s), {} run(s) left behind",
        summary.shutdown.handles_closed, summary.shutdown.drained.detached
    );
}

async fn run(cli_args: &CliArgs, file_config: Result<Option<FileConfig>>) -> Result<()> {
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config?)?;
    info!(
        "Using store {:?} ({}), base path {:?}",
        config.store_uri, config.store_name, config.base_path
    );

    let datasets = Datasets::discover(&config.dataset_dir())?;

    let summary = run_service(
        || Resources::open(&config),
        |resources| jobs::register_all(&config, &datasets, resources),
        config.scheduler.clone(),
        wait_for_signal(),
    )
    .await?;

    log_summary(&summary);
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli_args = CliArgs::parse();

    let file_config = cli_args.config.as_deref().map(FileConfig::load).transpose();
    let log_file = match &file_config {
        Ok(Some(file)) => file.log_file.as_ref().map(PathBuf::from),
        _ => None,
    }
    .or_else(|| cli_args.log_file.clone());

    if let Err(e) = init_tracing(log_file.as_deref()) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    info!(
        "Starting vtbili-server {} ({}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_PROFILE")
    );

    match run(&cli_args, file_config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
