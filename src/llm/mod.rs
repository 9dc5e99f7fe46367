// src/llm/mod.rs
pub mod ollama;
pub mod openai;
pub mod openai_compatible;

use crate::config::{Config, LlmProvider};
use crate::error::Result;
use crate::history::Turn;
use reqwest::Client;

/// Per-request knobs forwarded unchanged from the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
}

/// Sends `messages` to the active provider and returns the assistant reply.
pub async fn generate(
    client: &Client,
    config: &Config,
    messages: Vec<Turn>,
    options: &CompletionOptions,
) -> Result<String> {
    match config.active_provider {
        LlmProvider::OpenAi => openai::generate(client, config, messages, options).await,
        LlmProvider::Ollama => ollama::generate(client, config, messages, options).await,
    }
}
