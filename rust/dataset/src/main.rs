//! HuggingFace Dataset Fetcher CLI

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use podtrain_dataset::{
    Aria2Downloader, DEFAULT_BRANCH, HubClient, fetch,
    hub::DEFAULT_HUB_URL,
    layout::{DEFAULT_BASE_FOLDER, normalize_dataset_id},
    sanitize_branch_name,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "fetch-dataset", about = "Download a dataset from the HuggingFace Hub")]
struct Cli {
    /// Dataset id, e.g. `tatsu-lab/alpaca`
    dataset: Option<String>,

    /// Revision to download
    #[arg(long, default_value = DEFAULT_BRANCH)]
    branch: String,

    /// Number of files downloaded at once
    #[arg(long, default_value_t = 1)]
    threads: usize,

    /// Base folder for downloads
    #[arg(long)]
    output: Option<PathBuf>,

    /// Hub to download from
    #[arg(long, default_value = DEFAULT_HUB_URL, hide = true)]
    hub_url: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(indicatif_layer.get_stderr_writer()))
        .with(
            EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .with(indicatif_layer)
        .init();

    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let Some(dataset) = cli.dataset.as_deref() else {
        return Err(
            "please specify a dataset to download, e.g. `fetch-dataset tatsu-lab/alpaca`".into(),
        );
    };
    let dataset = normalize_dataset_id(dataset);
    let branch = sanitize_branch_name(&cli.branch)?;

    let downloader = Aria2Downloader::new(cli.threads).with_progress(true);
    if !downloader.is_installed() {
        return Err("aria2c not found on PATH".into());
    }

    let hub = HubClient::new(cli.hub_url)?;
    let base = cli.output.unwrap_or_else(|| PathBuf::from(DEFAULT_BASE_FOLDER));
    let outcome = fetch(&hub, &downloader, dataset, branch, &base).await?;

    let report = &outcome.report;
    tracing::info!(
        "Downloaded {} of {} files to {}, skipped {} already present",
        report.downloaded,
        outcome.listed,
        outcome.folder.display(),
        report.skipped
    );

    if !report.is_success() {
        for (path, reason) in &report.failed {
            eprintln!("  {path}: {reason}");
        }
        return Err(format!("{} files failed to download", report.failed.len()).into());
    }

    Ok(())
}
