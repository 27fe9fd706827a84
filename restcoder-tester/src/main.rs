//! RestCoder Tester
//!
//! A worker that grades submitted web applications. Each submission is
//! built into a container image, started together with its services in an
//! isolated network, and exercised by a test suite over HTTP.
//!
//! Architecture:
//! - Configuration: Load settings from environment or defaults
//! - Repositories: submission queue, progress notifications, log storage
//! - Runtime: docker and iptables behind a trait
//! - Services: log collection, progress relay, process launching, test bridge
//! - Pipeline: the eight provisioning and testing stages plus rollback
//! - Scheduler: queue polling under a parallelism bound
//! - Suite: the isolated test-runner child (`run-tests` mode)

mod config;
mod error;
mod naming;
mod pipeline;
mod repository;
mod runtime;
mod scheduler;
mod service;
mod suite;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::pipeline::SubmissionPipeline;
use crate::runtime::{DockerRuntime, RotatingPortAllocator};
use crate::scheduler::JobPoller;
use crate::service::{TestRunner, TestRunnerBridge};
use restcoder_client::{ApiClient, StorageClient};

#[derive(Parser)]
#[command(name = "restcoder-tester")]
#[command(about = "RestCoder submission grading worker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the submission queue and grade submissions (default)
    Worker,

    /// Grade a single submission read from a JSON file and print the result
    Run {
        /// Submission JSON file
        file: PathBuf,
    },

    /// Run a test suite as the isolated test-runner child
    #[command(hide = true)]
    RunTests {
        /// Timeout of a single test in milliseconds
        #[arg(long, env = "TEST_TIMEOUT_MS", default_value_t = 5000)]
        test_timeout_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Stdout belongs to the runner protocol in `run-tests` mode
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restcoder_tester=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command.unwrap_or(Commands::Worker) {
        Commands::Worker => run_worker().await,
        Commands::Run { file } => run_file(file).await,
        Commands::RunTests { test_timeout_ms } => {
            suite::run_child(Duration::from_millis(test_timeout_ms)).await
        }
    }
}

async fn run_worker() -> Result<()> {
    info!("Starting RestCoder Tester");

    let config = load_config()?;
    info!(
        "Loaded configuration: worker_id={}, api_url={}",
        config.worker_id, config.api_url
    );

    let client = Arc::new(ApiClient::new(config.api_url.clone()));
    info!("API client initialized");

    let pipeline = Arc::new(build_pipeline(&config, Arc::clone(&client)).await?);
    info!("Pipeline initialized");

    let poller = JobPoller::new(config.clone(), client, pipeline);

    info!("Starting job polling loop");
    if let Err(e) = poller.run().await {
        error!("Poller error: {}", e);
        return Err(e);
    }

    Ok(())
}

/// Grades one submission outside the queue
async fn run_file(file: PathBuf) -> Result<()> {
    let config = load_config()?;
    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let raw: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", file.display()))?;

    let client = Arc::new(ApiClient::new(config.api_url.clone()));
    let pipeline = build_pipeline(&config, client).await?;

    let result = pipeline.run(raw).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

/// Wires the production collaborators into a pipeline
async fn build_pipeline(config: &Config, client: Arc<ApiClient>) -> Result<SubmissionPipeline> {
    runtime::docker::check_docker_available(&config.docker_bin).await?;

    let storage = Arc::new(StorageClient::new(
        config.storage.url.clone(),
        config.storage.bucket.clone(),
        config.storage.public_url.clone(),
    ));
    let tests: Arc<dyn TestRunner> = Arc::new(
        TestRunnerBridge::current_exe(config).context("Failed to locate the worker binary")?,
    );

    Ok(SubmissionPipeline::new(
        config.clone(),
        Arc::new(DockerRuntime::from_config(config)),
        client,
        storage,
        Arc::new(RotatingPortAllocator::new(config.port_base)),
        tests,
    ))
}

/// Loads configuration from environment variables with fallback to defaults
fn load_config() -> Result<Config> {
    Config::load(|name| std::env::var(name).ok())
}
