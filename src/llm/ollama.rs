// src/llm/ollama.rs

use crate::config::Config;
use crate::error::Result;
use crate::history::Turn;
use crate::llm::openai_compatible::handle_api_response;
use crate::llm::CompletionOptions;
use anyhow::Context;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

// --- Request Structs ---

#[derive(Serialize, Debug)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Turn>,
    stream: bool, // Full response at once
    #[serde(skip_serializing_if = "OllamaOptions::is_empty")]
    options: OllamaOptions,
}

#[derive(Serialize, Debug, Default)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
}

impl OllamaOptions {
    fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.top_p.is_none()
    }
}

// --- Response Structs ---

#[derive(Deserialize, Debug)]
struct OllamaChatResponse {
    message: Turn,
}

#[instrument(skip(client, config, messages, options))]
pub async fn generate(
    client: &Client,
    config: &Config,
    messages: Vec<Turn>,
    options: &CompletionOptions,
) -> Result<String> {
    let target_model = options
        .model
        .as_deref()
        .unwrap_or(&config.default_ollama_model);
    let url = format!("{}/api/chat", config.ollama_base_url.trim_end_matches('/'));

    let request_payload = OllamaChatRequest {
        model: target_model.to_string(),
        messages,
        stream: false,
        options: OllamaOptions {
            temperature: options.temperature,
            top_p: options.top_p,
        },
    };

    debug!(?url, model = target_model, "Sending chat request to Ollama");

    let response = client
        .post(&url)
        .json(&request_payload)
        .send()
        .await
        .context(format!("Failed to send chat request to Ollama at {}", url))?;

    let ollama_response: OllamaChatResponse =
        handle_api_response(response, "Ollama chat").await?;

    Ok(ollama_response.message.content)
}
