// src/llm/openai.rs

use crate::config::Config;
use crate::error::Result;
use crate::history::Turn;
use crate::llm::openai_compatible as common_client; // Use the shared client
use crate::llm::CompletionOptions;
use anyhow::{anyhow, Context};
use reqwest::Client;
use tracing::instrument;

#[instrument(skip(client, config, messages, options))]
pub async fn generate(
    client: &Client,
    config: &Config,
    messages: Vec<Turn>,
    options: &CompletionOptions,
) -> Result<String> {
    let api_key = config
        .get_active_api_key()
        .ok_or_else(|| anyhow!("OPENAI_API_KEY is not set. Set the environment variable or add it to .env."))?;
    let model = options.model.as_deref().unwrap_or(&config.default_model);

    common_client::generate(client, api_key, &config.api_base_url, model, messages, options)
        .await
        .context("OpenAI API generate call failed")
}
