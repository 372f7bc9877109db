//! Spot GPU Training Launcher CLI
//!
//! Rents a spot pod for a training config, waits for it to start, and
//! terminates it if it does not.

use std::{env, process::ExitCode, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use podtrain_launcher::{
    config::{Credential, LaunchDocument, Override, ProviderSettings},
    guard::TerminationGuard,
    lifecycle::{Job, LaunchSettings, Orchestrator},
    marketplace::{Marketplace, runpod::RunpodClient},
    spec::build_spec,
};
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "podtrain", about = "Train on a Runpod spot pod")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rent a pod for a training config and wait for it to start
    Train {
        /// Path to the launch config (TOML)
        config: String,

        /// Override a config value, e.g. `--set runpod.gpu_count=2`
        #[arg(long = "set", value_name = "KEY=VALUE")]
        overrides: Vec<Override>,

        /// Seconds to wait for the pod to start (overrides the config)
        #[arg(long)]
        max_wait: Option<u64>,

        /// Seconds between status checks (overrides the config)
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Log raw status checks while waiting
        #[arg(long)]
        poll_debug: bool,
    },

    /// Show the current spot price for a GPU type
    Quote {
        #[arg(long, default_value = "NVIDIA RTX A5000")]
        gpu: String,

        #[arg(long, default_value_t = 1)]
        count: u32,
    },

    /// Show the status of a pod
    Status {
        /// Pod ID
        id: String,
    },

    /// Terminate a pod left behind by an interrupted launch
    Terminate {
        /// Pod ID
        id: String,
    },
}

/// Provider debug logging, read once at startup.
fn provider_debug() -> bool {
    env::var("RUNPOD_DEBUG").is_ok_and(|v| !v.is_empty())
}

fn client(provider: &ProviderSettings) -> Result<RunpodClient, Box<dyn std::error::Error>> {
    let credential = Credential::from_env(&provider.api_key_env)?;
    Ok(RunpodClient::new(
        provider.api_url.clone(),
        credential,
        provider_debug(),
    )?)
}

#[tokio::main]
async fn main() -> ExitCode {
    // tracing needs to be initialized with indicatif_layer to not clobber the spinner
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

    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Commands::Train {
            config,
            overrides,
            max_wait,
            poll_interval,
            poll_debug,
        } => {
            let config = config.trim();
            tracing::info!("Train on runpod with config: {config}");

            let document = LaunchDocument::load(config)?;
            let plan = build_spec(&document, &overrides)?;
            let client = client(&plan.provider)?;

            let mut settings = LaunchSettings::from_provider(&plan.provider);
            if let Some(secs) = max_wait {
                settings.max_wait = Duration::from_secs(secs);
            }
            if let Some(secs) = poll_interval {
                settings.poll_interval = Duration::from_secs(secs.max(1));
            }
            settings.poll_debug = poll_debug;
            settings.show_progress = true;

            let orchestrator = Orchestrator::new(Arc::new(client), settings);
            let mut job = Job::new(plan.job);

            let running = orchestrator.launch(&mut job).await?;

            println!();
            println!("=== Pod Running ===");
            println!("ID: {}", running.id);
            if let Some(bid) = job.bid() {
                println!("Bid: {bid:.3}/h per GPU");
            }
            println!("Auto-terminates at: {}", job.spec().terminate_at);
            if let Some(ssh) = running.ssh_command() {
                println!("SSH: {ssh}");
            }
            for port in &running.runtime.ports {
                println!(
                    "Port: {}:{} -> {} ({}{})",
                    port.ip,
                    port.public_port,
                    port.private_port,
                    port.kind,
                    if port.is_public { ", public" } else { "" }
                );
            }
            println!();
            println!(
                "The pod keeps running until you stop it: podtrain terminate {}",
                running.id
            );
        }

        Commands::Quote { gpu, count } => {
            let client = client(&ProviderSettings::default())?;
            let quote = client.get_quote(&gpu, count).await?;
            match quote.minimum_price {
                Some(price) => println!("{gpu} x{count}: minimum bid {price:.3}/h per GPU"),
                None => println!("{gpu} x{count}: no spot offers available"),
            }
        }

        Commands::Status { id } => {
            let client = client(&ProviderSettings::default())?;
            let pod = client.get_job(&id, provider_debug()).await?;
            match &pod.runtime {
                Some(runtime) => {
                    println!("{}: RUNNING (uptime {}s)", pod.id, runtime.uptime_secs);
                }
                None => println!("{}: STARTING", pod.id),
            }
            if let Some(address) = pod.ssh_address() {
                println!("SSH: {address}");
            }
        }

        Commands::Terminate { id } => {
            let guard = TerminationGuard::new(Arc::new(client(&ProviderSettings::default())?));
            let outcome = guard.terminate(&id).await;
            println!("{id}: {outcome}");
            if !outcome.is_success() {
                return Err(outcome.to_string().into());
            }
        }
    }

    Ok(())
}
