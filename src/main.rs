// src/main.rs

mod cli;
mod config;
mod error;
mod executor;
mod handler;
mod history;
mod llm;
mod role;

use anyhow::Context;
use clap::Parser;
use reqwest::Client;
use std::time::Duration;
use tracing::{error, info};

#[tokio::main]
async fn main() -> error::Result<()> {
    // Load .env before anything reads the environment
    dotenvy::dotenv().ok(); // Ignore error if .env is not found

    // Logs go to stderr so they never mix with model output
    #[cfg(feature = "logging")]
    {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(EnvFilter::from_default_env())
            .init();
    }

    let args = cli::Cli::parse();
    info!("Starting shell-chat...");

    let config = config::Config::load().context("Failed to load configuration")?;
    info!(
        provider = %config.active_provider,
        model = config.get_active_model_name(),
        "Configuration loaded"
    );

    let client = Client::builder()
        .timeout(Duration::from_secs(config.request_timeout))
        .build()
        .context("Failed to build HTTP client")?;

    if let Err(e) = cli::run(args, config, client).await {
        error!("Application error: {:?}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
